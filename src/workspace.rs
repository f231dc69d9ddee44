//! Working-directory checks and redistribution of generated files.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::config::Placement;
use crate::error::{GraftError, Result};
use crate::template::{Renderer, Values};
use crate::util;

/// One generated file and its destination in the project tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub from: Utf8PathBuf,
    pub to: Utf8PathBuf,
}

/// Fail if `dir` already holds an entry named with `prefix`.
///
/// Leftovers from an earlier run would otherwise be indistinguishable from
/// the directory about to be generated.
pub fn ensure_no_stale_workdirs(dir: &Utf8Path, prefix: &str) -> Result<()> {
    let mut found = dir
        .read_dir_utf8()
        .and_then(|entries| {
            entries
                .map(|entry| entry.map(|entry| entry.file_name().to_owned()))
                .collect::<io::Result<Vec<_>>>()
        })
        .map_err(|err| GraftError::io(format!("listing {dir}"), err))?;
    found.retain(|name| name.starts_with(prefix));

    if found.is_empty() {
        return Ok(());
    }
    found.sort();
    Err(GraftError::DirectoryPrecondition {
        prefix: prefix.to_owned(),
        dir: dir.to_owned(),
        found,
    })
}

/// Render every placement into a concrete move from `workdir` to `root`.
pub fn plan_moves(
    renderer: &Renderer,
    values: &Values,
    origin: &Utf8Path,
    placements: &[Placement],
    workdir: &Utf8Path,
    root: &Utf8Path,
) -> Result<Vec<Move>> {
    placements
        .iter()
        .map(|placement| {
            let from = renderer.render(origin, &placement.from, values)?;
            let to = renderer.render(origin, &placement.to, values)?;
            Ok(Move {
                from: workdir.join(from),
                to: root.join(to),
            })
        })
        .collect()
}

/// Carry out `moves` in order. Destinations must not exist yet.
///
/// Every move is checked before the first file is touched.
pub fn relocate(moves: &[Move]) -> Result<()> {
    for Move { from, to } in moves {
        if !from.is_file() {
            return Err(GraftError::io(
                format!("moving {from}"),
                io::Error::new(io::ErrorKind::NotFound, "generated file is missing"),
            ));
        }
        if to.exists() {
            return Err(GraftError::io(
                format!("moving {from} to {to}"),
                io::Error::new(io::ErrorKind::AlreadyExists, "destination already exists"),
            ));
        }
    }

    for Move { from, to } in moves {
        if let Some(parent) = to.parent() {
            util::fs::ensure_dir(parent)
                .map_err(|err| GraftError::io(format!("creating directory {parent}"), err))?;
        }
        util::fs::move_file(from, to)
            .map_err(|err| GraftError::io(format!("moving {from} to {to}"), err))?;
        info!(%from, %to, "moved");
    }
    Ok(())
}

/// Remove the generated directory. Only empty subdirectories may remain.
pub fn remove_workdir(workdir: &Utf8Path) -> Result<()> {
    let leftovers = leftover_entries(workdir)?;
    if !leftovers.is_empty() {
        return Err(GraftError::io(
            format!(
                "removing {workdir}: unplaced generated files remain: {}",
                leftovers.join(", ")
            ),
            io::Error::new(io::ErrorKind::DirectoryNotEmpty, "directory not empty"),
        ));
    }
    fs::remove_dir_all(workdir).map_err(|err| GraftError::io(format!("removing {workdir}"), err))
}

fn leftover_entries(dir: &Utf8Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    collect_leftovers(dir, dir, &mut out)?;
    out.sort();
    Ok(out)
}

fn collect_leftovers(root: &Utf8Path, dir: &Utf8Path, out: &mut Vec<String>) -> Result<()> {
    let entries = dir
        .read_dir_utf8()
        .map_err(|err| GraftError::io(format!("listing {dir}"), err))?;
    for entry in entries {
        let entry = entry.map_err(|err| GraftError::io(format!("listing {dir}"), err))?;
        let path = entry.path();
        if path.is_dir() {
            collect_leftovers(root, path, out)?;
        } else {
            let relative = path.strip_prefix(root).unwrap_or(path);
            out.push(relative.to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8_dir(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn stale_workdir_blocks_run() {
        let dir = TempDir::new().unwrap();
        let root = utf8_dir(&dir);
        fs::create_dir(root.join("src")).unwrap();
        ensure_no_stale_workdirs(&root, "cookiecutter-template-").unwrap();

        fs::create_dir(root.join("cookiecutter-template-bert")).unwrap();
        let err = ensure_no_stale_workdirs(&root, "cookiecutter-template-").unwrap_err();
        match err {
            GraftError::DirectoryPrecondition { found, .. } => {
                assert_eq!(found, vec!["cookiecutter-template-bert".to_owned()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn plans_and_relocates_files() {
        let dir = TempDir::new().unwrap();
        let root = utf8_dir(&dir);
        let workdir = root.join("cookiecutter-template-tiny");
        fs::create_dir(&workdir).unwrap();
        fs::write(workdir.join("modeling_tiny.py"), "model\n").unwrap();

        let mut values = Values::default();
        values.insert("lowercase_name", "tiny");
        let placements = vec![Placement {
            from: "modeling_{{lowercase_name}}.py".into(),
            to: "src/models/modeling_{{lowercase_name}}.py".into(),
        }];
        let moves = plan_moves(
            &Renderer::new(),
            &values,
            Utf8Path::new("graft.toml"),
            &placements,
            &workdir,
            &root,
        )
        .unwrap();
        assert_eq!(
            moves,
            vec![Move {
                from: workdir.join("modeling_tiny.py"),
                to: root.join("src/models/modeling_tiny.py"),
            }]
        );

        relocate(&moves).unwrap();
        assert_eq!(
            fs::read_to_string(root.join("src/models/modeling_tiny.py")).unwrap(),
            "model\n"
        );
        fs::create_dir(workdir.join("docs")).unwrap();
        remove_workdir(&workdir).unwrap();
        assert!(!workdir.exists());
    }

    #[test]
    fn relocate_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let root = utf8_dir(&dir);
        fs::write(root.join("a.py"), "new\n").unwrap();
        fs::write(root.join("b.py"), "old\n").unwrap();

        let err = relocate(&[Move {
            from: root.join("a.py"),
            to: root.join("b.py"),
        }])
        .unwrap_err();

        assert!(err.to_string().contains("b.py"));
        assert_eq!(fs::read_to_string(root.join("b.py")).unwrap(), "old\n");
        assert!(root.join("a.py").exists());
    }

    #[test]
    fn clash_on_later_move_moves_nothing() {
        let dir = TempDir::new().unwrap();
        let root = utf8_dir(&dir);
        let workdir = root.join("cookiecutter-template-tiny");
        fs::create_dir(&workdir).unwrap();
        fs::write(workdir.join("a.py"), "a\n").unwrap();
        fs::write(workdir.join("b.py"), "b\n").unwrap();
        fs::write(root.join("b.py"), "old\n").unwrap();

        let err = relocate(&[
            Move {
                from: workdir.join("a.py"),
                to: root.join("pkg/a.py"),
            },
            Move {
                from: workdir.join("b.py"),
                to: root.join("b.py"),
            },
        ])
        .unwrap_err();

        assert!(err.to_string().contains("b.py"));
        assert!(workdir.join("a.py").exists());
        assert!(!root.join("pkg").exists());
        assert_eq!(fs::read_to_string(root.join("b.py")).unwrap(), "old\n");
    }

    #[test]
    fn leftover_files_keep_workdir() {
        let dir = TempDir::new().unwrap();
        let workdir = utf8_dir(&dir).join("cookiecutter-template-x");
        fs::create_dir_all(workdir.join("docs")).unwrap();
        fs::write(workdir.join("docs").join("x.rst"), "").unwrap();

        let err = remove_workdir(&workdir).unwrap_err();

        assert!(err.to_string().contains("docs/x.rst"));
        assert!(workdir.exists());
    }
}
