//! Ordered reassembly of fetched chunks into one combined file.

use std::fs::File;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

use crate::error::TaskError;
use crate::task::Subtask;

/// Sort subtasks by offset, verify they form a contiguous cover of
/// `[0, total_size)`, and append each target file in order into a fresh
/// combined temp file inside `dir`. Blocking; call from `spawn_blocking`.
pub(super) fn combine(
    subtasks: &mut [Subtask],
    total_size: u64,
    dir: &Path,
) -> Result<NamedTempFile> {
    subtasks.sort_by_key(|st| st.offset);

    let mut expected = 0u64;
    for st in subtasks.iter() {
        if st.offset != expected {
            return Err(TaskError::OffsetMismatch {
                got: st.offset,
                want: expected,
            }
            .into());
        }
        expected += st.size;
    }
    if expected != total_size {
        return Err(TaskError::OffsetMismatch {
            got: expected,
            want: total_size,
        }
        .into());
    }

    let mut combined = tempfile::Builder::new()
        .prefix("combined-")
        .tempfile_in(dir)
        .context("create combined file")?;

    for st in subtasks.iter() {
        let mut part = File::open(&st.target_file)
            .with_context(|| format!("open chunk {}", st.target_file.display()))?;
        io::copy(&mut part, combined.as_file_mut())
            .with_context(|| format!("append chunk {}", st.target_file.display()))?;
    }

    let combined_len = combined.as_file().metadata().context("stat combined")?.len();
    if combined_len != total_size {
        return Err(TaskError::ShortRead {
            got: combined_len,
            want: total_size,
        }
        .into());
    }

    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn subtask(id: u32, offset: u64, size: u64, target: PathBuf) -> Subtask {
        Subtask {
            id,
            url: "http://o/f".into(),
            offset,
            size,
            target_file: target,
            assigned_to: -1,
            retry_count: 0,
            error: None,
        }
    }

    #[test]
    fn combines_in_offset_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("part-a");
        let b = dir.path().join("part-b");
        std::fs::write(&a, b"hello ").unwrap();
        std::fs::write(&b, b"world").unwrap();

        // Deliberately out of order: sorting is the assembler's job.
        let mut subtasks = vec![subtask(1, 6, 5, b), subtask(0, 0, 6, a)];
        let combined = combine(&mut subtasks, 11, dir.path()).unwrap();
        assert_eq!(std::fs::read(combined.path()).unwrap(), b"hello world");
    }

    #[test]
    fn gap_in_offsets_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("part-a");
        std::fs::write(&a, b"xxxx").unwrap();

        let mut subtasks = vec![subtask(0, 2, 4, a)];
        let err = combine(&mut subtasks, 6, dir.path()).unwrap_err();
        match err.downcast_ref::<TaskError>().unwrap() {
            TaskError::OffsetMismatch { got, want } => {
                assert_eq!((*got, *want), (2, 0));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cover_shorter_than_total_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("part-a");
        std::fs::write(&a, b"xxxx").unwrap();

        let mut subtasks = vec![subtask(0, 0, 4, a)];
        let err = combine(&mut subtasks, 10, dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TaskError>().unwrap(),
            TaskError::OffsetMismatch { got: 4, want: 10 }
        ));
    }

    #[test]
    fn truncated_chunk_on_disk_is_a_short_read() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("part-a");
        std::fs::write(&a, b"xx").unwrap(); // plan says 4 bytes

        let mut subtasks = vec![subtask(0, 0, 4, a)];
        let err = combine(&mut subtasks, 4, dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TaskError>().unwrap(),
            TaskError::ShortRead { got: 2, want: 4 }
        ));
    }

    #[test]
    fn zero_subtasks_make_an_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut subtasks: Vec<Subtask> = Vec::new();
        let combined = combine(&mut subtasks, 0, dir.path()).unwrap();
        assert_eq!(std::fs::metadata(combined.path()).unwrap().len(), 0);
    }
}
