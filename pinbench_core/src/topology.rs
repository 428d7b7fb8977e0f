//! Host CPU topology discovery
//!
//! Wraps `lscpu --json -a -e` and turns its per-CPU rows into a
//! [`TopologyTable`]. The only policy built on top of it is
//! [`physical_core_zero_cpus`], which picks the logical CPUs that share the
//! first physical core; benchmark workloads are pinned to that set.
//!
//! `lscpu` names the cache columns with a single colon-joined header such as
//! `"l1d:l1i:l2:l3"` whose value is the matching colon-joined list of cache
//! ids. The header is discovered per row rather than hard-coded, since the
//! set of levels differs between machines.

use crate::error::{BenchError, BenchResult};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::process::Command;

/// One schedulable CPU and its core, NUMA node and cache affiliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogicalCpu {
    pub id: usize,
    pub core: usize,
    pub numa_node: usize,
    /// Cache ids, positionally matching [`TopologyTable::cache_level_names`]
    pub cache_ids: Vec<u64>,
}

/// Snapshot of the host topology, built once per benchmarking run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopologyTable {
    logical_cpus: Vec<LogicalCpu>,
    cache_level_names: Vec<String>,
}

impl TopologyTable {
    /// Build a table, checking id uniqueness and cache-column arity
    pub fn new(
        logical_cpus: Vec<LogicalCpu>,
        cache_level_names: Vec<String>,
    ) -> BenchResult<Self> {
        let mut seen = HashSet::new();
        for cpu in &logical_cpus {
            if !seen.insert(cpu.id) {
                return Err(BenchError::TopologyUnavailable(format!(
                    "duplicate logical CPU id {}",
                    cpu.id
                )));
            }
            if cpu.cache_ids.len() != cache_level_names.len() {
                return Err(BenchError::TopologyUnavailable(format!(
                    "CPU {} reports {} cache ids for {} cache levels",
                    cpu.id,
                    cpu.cache_ids.len(),
                    cache_level_names.len()
                )));
            }
        }
        Ok(Self {
            logical_cpus,
            cache_level_names,
        })
    }

    /// Parse the output of `lscpu --json -a -e`
    pub fn from_lscpu_json(stdout: &str) -> BenchResult<Self> {
        let root: Value = serde_json::from_str(stdout).map_err(|e| {
            BenchError::TopologyUnavailable(format!("lscpu JSON parse error: {}", e))
        })?;
        let rows = root
            .get("cpus")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                BenchError::TopologyUnavailable("missing \"cpus\" array".to_string())
            })?;

        let Some(first) = rows.first() else {
            return Ok(Self::default());
        };

        let header = cache_header(as_object(first)?)?;
        let cache_level_names = cache_levels_from_header(&header)?;

        let mut logical_cpus = Vec::with_capacity(rows.len());
        for row in rows {
            let obj = as_object(row)?;
            let row_header = cache_header(obj)?;
            if row_header != header {
                return Err(BenchError::TopologyUnavailable(format!(
                    "cache column changed from {:?} to {:?} between rows",
                    header, row_header
                )));
            }

            let cache_ids = text_field(obj, &header)?
                .split(':')
                .map(|id| {
                    id.trim().parse::<u64>().map_err(|_| {
                        BenchError::TopologyUnavailable(format!(
                            "invalid cache id {:?} in column {:?}",
                            id, header
                        ))
                    })
                })
                .collect::<BenchResult<Vec<_>>>()?;

            logical_cpus.push(LogicalCpu {
                id: int_field(obj, "cpu")?,
                core: int_field(obj, "core")?,
                // Single-node machines commonly omit the column
                numa_node: if obj.contains_key("node") {
                    int_field(obj, "node")?
                } else {
                    0
                },
                cache_ids,
            });
        }

        Self::new(logical_cpus, cache_level_names)
    }

    pub fn logical_cpus(&self) -> &[LogicalCpu] {
        &self.logical_cpus
    }

    pub fn cache_level_names(&self) -> &[String] {
        &self.cache_level_names
    }

    pub fn is_empty(&self) -> bool {
        self.logical_cpus.is_empty()
    }

    /// Number of distinct physical cores
    pub fn physical_core_count(&self) -> usize {
        self.logical_cpus
            .iter()
            .map(|cpu| cpu.core)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Number of distinct NUMA nodes
    pub fn numa_node_count(&self) -> usize {
        self.logical_cpus
            .iter()
            .map(|cpu| cpu.numa_node)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Query the host via `lscpu`
pub fn resolve() -> BenchResult<TopologyTable> {
    let output = Command::new("lscpu")
        .args(["--json", "-a", "-e"])
        .output()
        .map_err(|e| BenchError::TopologyUnavailable(format!("failed to run lscpu: {}", e)))?;

    if !output.status.success() {
        return Err(BenchError::TopologyUnavailable(format!(
            "lscpu exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let stdout = String::from_utf8(output.stdout).map_err(|e| {
        BenchError::TopologyUnavailable(format!("lscpu output is not UTF-8: {}", e))
    })?;
    let table = TopologyTable::from_lscpu_json(&stdout)?;
    log::debug!(
        "Resolved {} logical CPUs on {} physical cores, cache levels {:?}",
        table.logical_cpus().len(),
        table.physical_core_count(),
        table.cache_level_names()
    );
    Ok(table)
}

/// Ids of every logical CPU on physical core 0
pub fn physical_core_zero_cpus(table: &TopologyTable) -> BenchResult<BTreeSet<usize>> {
    let cpus: BTreeSet<usize> = table
        .logical_cpus()
        .iter()
        .filter(|cpu| cpu.core == 0)
        .map(|cpu| cpu.id)
        .collect();

    if cpus.is_empty() {
        return Err(BenchError::EmptyPinningSet);
    }
    Ok(cpus)
}

/// Render a CPU set the way cpuset lists are written (`0,4`)
pub fn format_cpu_list(cpus: &BTreeSet<usize>) -> String {
    cpus.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn as_object(row: &Value) -> BenchResult<&Map<String, Value>> {
    row.as_object().ok_or_else(|| {
        BenchError::TopologyUnavailable(format!("CPU row is not an object: {}", row))
    })
}

fn cache_header(obj: &Map<String, Value>) -> BenchResult<String> {
    let mut candidates = obj.keys().filter(|k| k.contains(':'));
    match (candidates.next(), candidates.next()) {
        (Some(key), None) => Ok(key.clone()),
        (None, _) => Err(BenchError::TopologyUnavailable(
            "no cache-level column in CPU row".to_string(),
        )),
        (Some(a), Some(b)) => Err(BenchError::TopologyUnavailable(format!(
            "ambiguous cache-level columns {:?} and {:?}",
            a, b
        ))),
    }
}

fn cache_levels_from_header(header: &str) -> BenchResult<Vec<String>> {
    let levels: Vec<String> = header.split(':').map(str::to_string).collect();

    let mut seen = HashSet::new();
    for level in &levels {
        if level.is_empty() {
            return Err(BenchError::TopologyUnavailable(format!(
                "empty cache level name in {:?}",
                header
            )));
        }
        if !seen.insert(level.to_lowercase()) {
            return Err(BenchError::TopologyUnavailable(format!(
                "duplicate cache level {:?} in {:?}",
                level, header
            )));
        }
    }
    Ok(levels)
}

fn text_field<'a>(obj: &'a Map<String, Value>, key: &str) -> BenchResult<&'a str> {
    obj.get(key).and_then(Value::as_str).ok_or_else(|| {
        BenchError::TopologyUnavailable(format!("missing or non-text column {:?}", key))
    })
}

// lscpu prints numbers as JSON numbers on recent util-linux and as strings on
// older releases; accept both.
fn int_field(obj: &Map<String, Value>, key: &str) -> BenchResult<usize> {
    let value = obj
        .get(key)
        .ok_or_else(|| BenchError::TopologyUnavailable(format!("missing column {:?}", key)))?;

    let parsed = match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        BenchError::TopologyUnavailable(format!("invalid value {} in column {:?}", value, key))
    })
}
