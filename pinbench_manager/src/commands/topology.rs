//! Topology command - show what the benchmarks will be pinned to

use anyhow::{Context, Result};
use colored::*;
use pinbench_core::topology::{self, format_cpu_list, physical_core_zero_cpus};
use pinbench_core::TopologyTable;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Serialize)]
struct TopologyReport<'a> {
    topology: &'a TopologyTable,
    pinned_cpus: &'a BTreeSet<usize>,
}

pub fn show_topology(json: bool) -> Result<()> {
    let table = topology::resolve().context("Failed to resolve CPU topology")?;
    let pinned = physical_core_zero_cpus(&table)?;

    if json {
        let report = TopologyReport {
            topology: &table,
            pinned_cpus: &pinned,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_table(&table, &pinned));
    }
    Ok(())
}

/// Human-readable table, one row per logical CPU
pub fn render_table(table: &TopologyTable, pinned: &BTreeSet<usize>) -> String {
    let mut out = format!(
        "{} {} logical CPUs, {} physical cores, {} NUMA node(s)\n\n",
        "CPU topology:".green().bold(),
        table.logical_cpus().len(),
        table.physical_core_count(),
        table.numa_node_count()
    );

    let mut header = format!("  {:>4} {:>5} {:>5}", "CPU", "CORE", "NODE");
    for level in table.cache_level_names() {
        header.push_str(&format!(" {:>5}", level));
    }
    out.push_str(&header.bold().to_string());
    out.push('\n');

    for cpu in table.logical_cpus() {
        let mut row = format!("  {:>4} {:>5} {:>5}", cpu.id, cpu.core, cpu.numa_node);
        for id in &cpu.cache_ids {
            row.push_str(&format!(" {:>5}", id));
        }
        if pinned.contains(&cpu.id) {
            out.push_str(&format!("{}  {}\n", row.cyan(), "<- pinned".dimmed()));
        } else {
            out.push_str(&row);
            out.push('\n');
        }
    }

    out.push_str(&format!(
        "\nBenchmarks run on CPUs {}\n",
        format_cpu_list(pinned)
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinbench_core::LogicalCpu;

    #[test]
    fn test_render_marks_pinned_cpus() {
        colored::control::set_override(false);
        let table = TopologyTable::new(
            vec![
                LogicalCpu {
                    id: 0,
                    core: 0,
                    numa_node: 0,
                    cache_ids: vec![0],
                },
                LogicalCpu {
                    id: 1,
                    core: 1,
                    numa_node: 0,
                    cache_ids: vec![1],
                },
            ],
            vec!["L1d".to_string()],
        )
        .unwrap();
        let pinned = physical_core_zero_cpus(&table).unwrap();

        let rendered = render_table(&table, &pinned);
        assert!(rendered.contains("L1d"));
        assert!(rendered.contains("<- pinned"));
        assert_eq!(rendered.matches("<- pinned").count(), 1);
        assert!(rendered.contains("Benchmarks run on CPUs 0"));
    }
}
