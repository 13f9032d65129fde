// SPDX-License-Identifier: MIT

//! OS process-group hygiene for stdio upstreams (§5: "Process-group
//! hygiene (stdio)"). Every spawned subprocess is placed in its own
//! process group so that the whole tree of descendants can be reliably
//! terminated, even ones the upstream itself spawned and forgot about.

use std::fs;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

pub fn cidfile_path(data_dir: &Path, upstream: &str) -> PathBuf {
    data_dir.join("logs").join(format!("{upstream}.cid"))
}

pub fn write_cidfile(data_dir: &Path, upstream: &str, pgid: i32) -> std::io::Result<()> {
    let path = cidfile_path(data_dir, upstream);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, pgid.to_string())
}

pub fn remove_cidfile(data_dir: &Path, upstream: &str) {
    let _ = fs::remove_file(cidfile_path(data_dir, upstream));
}

/// Scans `<data_dir>/logs/*.cid` left behind by a prior crash and signals
/// each recorded process group, reaping descendants that outlived the
/// proxy itself. Returns the upstream names whose orphan group was
/// signalled. Best-effort: a group that's already gone is silently
/// skipped.
pub fn sweep_orphans(data_dir: &Path) -> Vec<String> {
    let mut reaped = Vec::new();
    let dir = data_dir.join("logs");
    let Ok(entries) = fs::read_dir(&dir) else {
        return reaped;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("cid") {
            continue;
        }
        if let Ok(contents) = fs::read_to_string(&path) {
            if let Ok(pgid) = contents.trim().parse::<i32>() {
                let _ = terminate_group(pgid, true);
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    reaped.push(stem.to_string());
                }
            }
        }
        let _ = fs::remove_file(&path);
    }
    reaped
}

#[cfg(unix)]
pub fn terminate_group(pgid: i32, force: bool) -> Result<(), nix::errno::Errno> {
    let target = Pid::from_raw(-pgid);
    let sig = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    kill(target, sig)
}

#[cfg(not(unix))]
pub fn terminate_group(_pgid: i32, _force: bool) -> Result<(), std::io::Error> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidfile_round_trips_pgid() {
        let dir = tempfile::tempdir().unwrap();
        write_cidfile(dir.path(), "gh", 4242).unwrap();
        let contents = fs::read_to_string(cidfile_path(dir.path(), "gh")).unwrap();
        assert_eq!(contents, "4242");
    }

    #[test]
    fn sweep_orphans_removes_cidfiles_it_visits() {
        let dir = tempfile::tempdir().unwrap();
        write_cidfile(dir.path(), "gh", 999_999).unwrap();
        let reaped = sweep_orphans(dir.path());
        assert_eq!(reaped, vec!["gh".to_string()]);
        assert!(!cidfile_path(dir.path(), "gh").exists());
    }
}
