// Shared fakes for integration tests
#![allow(dead_code)]

use pinbench_core::runtime::{
    ContainerRuntime, ImageHandle, InstanceHandle, LaunchSpec, LogStream,
};
use pinbench_core::sandbox::ENV_LOOP_STEPS;
use pinbench_core::{
    BenchError, BenchResult, ImageBuildSpec, JobSpec, LogicalCpu, TopologyTable, WorkloadSize,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What a fake workload does for a given loop-step count
pub struct Workload {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl Workload {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

type Script = Box<dyn FnMut(&LaunchSpec, u64) -> Workload>;

#[derive(Default)]
struct FakeState {
    next_id: usize,
    builds: Vec<PathBuf>,
    launches: Vec<LaunchSpec>,
    outputs: HashMap<String, Workload>,
    stopped: Vec<(String, Duration)>,
    removed: Vec<String>,
    failing_builds: HashMap<PathBuf, String>,
    fail_wait: bool,
    fail_stop: bool,
}

/// In-memory container runtime that runs a scripted workload
pub struct FakeRuntime {
    state: RefCell<FakeState>,
    script: RefCell<Script>,
}

impl FakeRuntime {
    pub fn new<F>(script: F) -> Self
    where
        F: FnMut(&LaunchSpec, u64) -> Workload + 'static,
    {
        Self {
            state: RefCell::new(FakeState::default()),
            script: RefCell::new(Box::new(script)),
        }
    }

    /// Workload reporting `per_iteration` seconds per step on `lines` lines
    pub fn steady(per_iteration: f64, lines: usize) -> Self {
        Self::new(move |_, steps| {
            let total = per_iteration * steps as f64;
            Workload::ok(format!("{}s\n", total).repeat(lines))
        })
    }

    pub fn fail_build(&self, context_dir: impl Into<PathBuf>, diagnostics: &str) {
        self.state
            .borrow_mut()
            .failing_builds
            .insert(context_dir.into(), diagnostics.to_string());
    }

    pub fn fail_wait(&self) {
        self.state.borrow_mut().fail_wait = true;
    }

    pub fn fail_stop(&self) {
        self.state.borrow_mut().fail_stop = true;
    }

    pub fn builds(&self) -> Vec<PathBuf> {
        self.state.borrow().builds.clone()
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.state.borrow().launches.clone()
    }

    pub fn stopped(&self) -> Vec<(String, Duration)> {
        self.state.borrow().stopped.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.borrow().removed.clone()
    }

    pub fn loop_steps(&self) -> Vec<u64> {
        self.launches()
            .iter()
            .map(|l| l.env[ENV_LOOP_STEPS].parse().unwrap())
            .collect()
    }
}

impl ContainerRuntime for FakeRuntime {
    fn build(
        &self,
        context_dir: &Path,
        _build_args: &BTreeMap<String, String>,
    ) -> BenchResult<ImageHandle> {
        let mut state = self.state.borrow_mut();
        state.builds.push(context_dir.to_path_buf());
        if let Some(diagnostics) = state.failing_builds.get(context_dir) {
            return Err(BenchError::BuildFailed {
                job: context_dir.display().to_string(),
                diagnostics: diagnostics.clone(),
            });
        }
        Ok(ImageHandle::new(format!("sha256:{}", state.builds.len())))
    }

    fn run(&self, spec: &LaunchSpec) -> BenchResult<InstanceHandle> {
        let steps: u64 = spec.env[ENV_LOOP_STEPS].parse().unwrap();
        let workload = {
            let mut script = self.script.borrow_mut();
            (*script)(spec, steps)
        };

        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = format!("instance-{}", state.next_id);
        state.launches.push(spec.clone());
        state.outputs.insert(id.clone(), workload);
        Ok(InstanceHandle::new(id))
    }

    fn wait(&self, instance: &InstanceHandle) -> BenchResult<i64> {
        let state = self.state.borrow();
        if state.fail_wait {
            return Err(BenchError::runtime("daemon went away"));
        }
        Ok(state.outputs[instance.id()].exit_code)
    }

    fn logs(&self, instance: &InstanceHandle, stream: LogStream) -> BenchResult<Vec<u8>> {
        let state = self.state.borrow();
        let workload = &state.outputs[instance.id()];
        Ok(match stream {
            LogStream::Stdout => workload.stdout.clone().into_bytes(),
            LogStream::Stderr => workload.stderr.clone().into_bytes(),
        })
    }

    fn stop(&self, instance: &InstanceHandle, timeout: Duration) -> BenchResult<()> {
        let mut state = self.state.borrow_mut();
        state.stopped.push((instance.id().to_string(), timeout));
        if state.fail_stop {
            return Err(BenchError::runtime("stop refused"));
        }
        Ok(())
    }

    fn remove(&self, instance: &InstanceHandle) -> BenchResult<()> {
        self.state
            .borrow_mut()
            .removed
            .push(instance.id().to_string());
        Ok(())
    }
}

pub fn job(name: &str) -> JobSpec {
    JobSpec {
        name: name.to_string(),
        size: WorkloadSize::Int(256),
        batch_size: 4,
        backend_name: "native".to_string(),
        image: ImageBuildSpec {
            context_dir: PathBuf::from("/jobs").join(name),
            build_args: BTreeMap::new(),
        },
        launch_command: vec!["/bench".to_string(), name.to_string()],
    }
}

/// Two physical cores with hyperthreading: core 0 is CPUs 0 and 2
pub fn smt_topology() -> TopologyTable {
    let cpus = [(0, 0), (1, 1), (2, 0), (3, 1)]
        .iter()
        .map(|&(id, core)| LogicalCpu {
            id,
            core,
            numa_node: 0,
            cache_ids: vec![core as u64, 0],
        })
        .collect();
    TopologyTable::new(cpus, vec!["L1d".to_string(), "L3".to_string()]).unwrap()
}

/// cpufreq tree with `cpus` CPUs on the powersave governor
pub fn fake_cpufreq(root: &Path, cpus: usize) {
    for i in 0..cpus {
        let dir = root.join(format!("cpu{}", i)).join("cpufreq");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("scaling_governor"), "powersave\n").unwrap();
        fs::write(dir.join("scaling_min_freq"), "800000\n").unwrap();
        fs::write(dir.join("scaling_max_freq"), "3000000\n").unwrap();
        fs::write(dir.join("cpuinfo_min_freq"), "400000\n").unwrap();
        fs::write(dir.join("cpuinfo_max_freq"), "4200000\n").unwrap();
    }
}

pub fn read_cpufreq(root: &Path, cpu: usize, file: &str) -> String {
    fs::read_to_string(root.join(format!("cpu{}/cpufreq/{}", cpu, file)))
        .unwrap()
        .trim()
        .to_string()
}
