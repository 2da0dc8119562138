//! Table rows derived from the API payload for the display layer.

use crate::api::{DiskInfo, MemInfo, ProcBrief, ProcInfo};

/// One mounted filesystem joined with its usage.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskRow {
    pub mountpoint: String,
    pub fstype: String,
    pub device: String,
    pub total: u64,
    pub used: u64,
    pub percent: f64,
}

/// Used/free breakdown of RAM and swap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySplit {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub used_percent: f64,
    /// (used, total), if the provider reported swap
    pub swap: Option<(u64, u64)>,
}

/// Case-insensitive substring match; an empty needle matches everything.
fn matches_filter(haystacks: &[&str], needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    haystacks
        .iter()
        .any(|h| h.to_lowercase().contains(&needle))
}

/// Partitions with their usage, filtered on mountpoint, fstype and device.
pub fn disk_rows(disk: &DiskInfo, filter: &str) -> Vec<DiskRow> {
    disk.partitions
        .iter()
        .map(|p| {
            let (total, used) = disk
                .usage
                .get(&p.mountpoint)
                .map(|u| (u.total, u.used))
                .unwrap_or((0, 0));
            let percent = if total > 0 {
                used as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            DiskRow {
                mountpoint: p.mountpoint.clone(),
                fstype: p.fstype.clone(),
                device: p.device.clone(),
                total,
                used,
                percent,
            }
        })
        .filter(|row| {
            let joined = format!("{} {} {}", row.mountpoint, row.fstype, row.device);
            matches_filter(&[joined.as_str()], filter)
        })
        .collect()
}

/// Processes matching the filter on name, user or command line, at most `top_n`.
pub fn process_rows<'a>(procs: &'a ProcInfo, filter: &str, top_n: usize) -> Vec<&'a ProcBrief> {
    procs
        .top
        .iter()
        .filter(|p| matches_filter(&[p.name.as_str(), p.username.as_str(), p.cmdline.as_str()], filter))
        .take(top_n)
        .collect()
}

pub fn memory_split(mem: &MemInfo) -> Option<MemorySplit> {
    let vm = mem.virtual_memory.as_ref()?;
    Some(MemorySplit {
        total: vm.total,
        used: vm.used,
        free: vm.total.saturating_sub(vm.used),
        used_percent: vm.used_percent,
        swap: mem.swap.as_ref().map(|s| (s.used, s.total)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{DiskUsage, Partition, SwapMemory, VirtualMemory};
    use std::collections::HashMap;

    fn disk() -> DiskInfo {
        let partition = |device: &str, mountpoint: &str, fstype: &str| Partition {
            device: device.to_string(),
            mountpoint: mountpoint.to_string(),
            fstype: fstype.to_string(),
        };
        let mut usage = HashMap::new();
        usage.insert("/".to_string(), DiskUsage { total: 200, used: 50 });
        usage.insert("/boot".to_string(), DiskUsage { total: 0, used: 0 });
        DiskInfo {
            partitions: vec![
                partition("/dev/sda2", "/", "ext4"),
                partition("/dev/sda1", "/boot", "vfat"),
                partition("tmpfs", "/run", "tmpfs"),
            ],
            usage,
        }
    }

    fn proc(name: &str, user: &str, cmd: &str) -> ProcBrief {
        ProcBrief {
            name: name.to_string(),
            username: user.to_string(),
            cmdline: cmd.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn disk_rows_join_usage() {
        let rows = disk_rows(&disk(), "");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].percent, 25.0);
        // zero-sized and unknown usage read as 0%
        assert_eq!(rows[1].percent, 0.0);
        assert_eq!(rows[2].total, 0);
    }

    #[test]
    fn disk_filter_matches_any_column_case_insensitively() {
        let rows = disk_rows(&disk(), "VFAT");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].mountpoint, "/boot");

        let rows = disk_rows(&disk(), "sda");
        assert_eq!(rows.len(), 2);

        assert!(disk_rows(&disk(), "nfs").is_empty());
    }

    #[test]
    fn process_filter_then_top_n() {
        let procs = ProcInfo {
            count: 4,
            top: vec![
                proc("postgres", "postgres", "postgres -D /var/lib/pg"),
                proc("nginx", "www-data", "nginx: worker"),
                proc("bash", "alice", "-bash"),
                proc("psql", "alice", "psql -U postgres"),
            ],
        };

        let names = |rows: Vec<&ProcBrief>| rows.iter().map(|p| p.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(process_rows(&procs, "", 2)), vec!["postgres", "nginx"]);
        assert_eq!(names(process_rows(&procs, "ALICE", 15)), vec!["bash", "psql"]);
        assert_eq!(names(process_rows(&procs, "postgres", 15)), vec!["postgres", "psql"]);
        assert_eq!(names(process_rows(&procs, "postgres", 1)), vec!["postgres"]);
    }

    #[test]
    fn memory_split_needs_virtual_memory() {
        assert_eq!(memory_split(&MemInfo::default()), None);

        let mem = MemInfo {
            virtual_memory: Some(VirtualMemory {
                total: 1000,
                used: 600,
                used_percent: 60.0,
            }),
            swap: Some(SwapMemory { total: 50, used: 5 }),
        };
        let split = memory_split(&mem).unwrap();
        assert_eq!(split.free, 400);
        assert_eq!(split.swap, Some((5, 50)));
    }
}
