pub mod doctor;
pub mod run;
pub mod topology;
