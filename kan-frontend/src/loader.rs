/*!
Module loading.

An `import X` names the sibling file `X.ctt`. Loading walks the import graph
depth-first and returns the modules in dependency order: every import
precedes the module that names it, and a module reached along several import
paths appears exactly once. Paths are canonicalized first, so two routes to
the same file always collapse.
*/

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use smol_str::SmolStr;
use thiserror::Error;

use crate::{Module, ParseError, parse_module};

/// One loaded module, tagged with the file it came from.
#[derive(Debug, Clone)]
pub struct ModuleFile {
    pub path: PathBuf,
    pub module: Module,
}

/// A failure while walking the import graph.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("module not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("import cycle through {}", .0.display())]
    Cycle(PathBuf),
    #[error("{}: module {found} does not match the file name", .path.display())]
    NameMismatch { path: PathBuf, found: SmolStr },
    #[error("{}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Load `root` and everything it imports.
pub fn load_graph(root: &Path) -> Result<Vec<ModuleFile>, LoadError> {
    let mut walk = Walk {
        visiting: Vec::new(),
        done: hashbrown::HashSet::default(),
        out: Vec::new(),
    };
    walk.visit(root)?;
    Ok(walk.out)
}

struct Walk {
    /// The import path currently being expanded, for cycle detection.
    visiting: Vec<PathBuf>,
    done: hashbrown::HashSet<PathBuf, fxhash::FxBuildHasher>,
    out: Vec<ModuleFile>,
}

impl Walk {
    fn visit(&mut self, path: &Path) -> Result<(), LoadError> {
        let canon = match path.canonicalize() {
            Ok(p) => p,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LoadError::NotFound(path.to_path_buf()));
            }
            Err(e) => {
                return Err(LoadError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        if self.done.contains(&canon) {
            return Ok(());
        }
        if self.visiting.contains(&canon) {
            return Err(LoadError::Cycle(canon));
        }
        let text = fs::read_to_string(&canon).map_err(|source| LoadError::Io {
            path: canon.clone(),
            source,
        })?;
        let module = parse_module(&text).map_err(|source| LoadError::Parse {
            path: canon.clone(),
            source,
        })?;
        let stem = canon.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if module.name != stem {
            return Err(LoadError::NameMismatch {
                path: canon,
                found: module.name,
            });
        }
        log::debug!("loading {} from {}", module.name, canon.display());
        self.visiting.push(canon.clone());
        for import in &module.imports {
            let sibling = canon.with_file_name(format!("{import}.ctt"));
            self.visit(&sibling)?;
        }
        self.visiting.pop();
        self.done.insert(canon.clone());
        self.out.push(ModuleFile {
            path: canon,
            module,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn missing_modules_are_reported() {
        let dir = TempDir::new().unwrap();
        let err = load_graph(&dir.path().join("absent.ctt")).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn direct_self_import_names_the_file() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "A.ctt", "module A where\nimport A\n");
        let err = load_graph(&a).unwrap_err();
        let LoadError::Cycle(p) = err else {
            panic!("expected a cycle");
        };
        assert_eq!(p, a.canonicalize().unwrap());
    }

    #[test]
    fn longer_cycles_are_detected() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "A.ctt", "module A where\nimport B\n");
        write(&dir, "B.ctt", "module B where\nimport A\n");
        assert!(matches!(load_graph(&a).unwrap_err(), LoadError::Cycle(_)));
    }

    #[test]
    fn diamonds_load_once_in_dependency_order() {
        let dir = TempDir::new().unwrap();
        write(&dir, "D.ctt", "module D where\nd : U = U\n");
        write(&dir, "B.ctt", "module B where\nimport D\nb : U = d\n");
        write(&dir, "C.ctt", "module C where\nimport D\nc : U = d\n");
        let a = write(&dir, "A.ctt", "module A where\nimport B\nimport C\na : U = b\n");
        let loaded = load_graph(&a).unwrap();
        let names: Vec<&str> = loaded.iter().map(|m| m.module.name.as_str()).collect();
        assert_eq!(names, ["D", "B", "C", "A"]);
    }

    #[test]
    fn module_name_must_match_the_file() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "A.ctt", "module Other where\n");
        let err = load_graph(&a).unwrap_err();
        assert!(matches!(err, LoadError::NameMismatch { found, .. } if found == "Other"));
    }

    #[test]
    fn parse_errors_carry_the_path() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "A.ctt", "module A where\nbroken : U =\n");
        let err = load_graph(&a).unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
    }

    /// Import lists for modules `M0..Mn`, each importing only lower
    /// indices, so the graph is a DAG by construction.
    fn dag() -> impl proptest::strategy::Strategy<Value = Vec<Vec<usize>>> {
        use proptest::prelude::*;
        (2usize..6).prop_flat_map(|n| {
            (0..n)
                .map(|i| {
                    if i == 0 {
                        Just(Vec::new()).boxed()
                    } else {
                        prop::collection::btree_set(0..i, 0..=i)
                            .prop_map(|s| s.into_iter().collect::<Vec<_>>())
                            .boxed()
                    }
                })
                .collect::<Vec<_>>()
        })
    }

    proptest::proptest! {
        /// Whatever shape the DAG takes, every module loads at most
        /// once and strictly after everything it imports.
        #[test]
        fn loads_respect_dependency_order(imports in dag()) {
            let dir = TempDir::new().unwrap();
            for (i, deps) in imports.iter().enumerate() {
                let mut src = format!("module M{i} where\n");
                for d in deps {
                    src.push_str(&format!("import M{d}\n"));
                }
                src.push_str(&format!("m{i} : U = U\n"));
                write(&dir, &format!("M{i}.ctt"), &src);
            }
            let root = dir.path().join(format!("M{}.ctt", imports.len() - 1));
            let loaded = load_graph(&root).unwrap();
            let names: Vec<&str> =
                loaded.iter().map(|m| m.module.name.as_str()).collect();
            let mut unique = names.clone();
            unique.sort();
            unique.dedup();
            proptest::prop_assert_eq!(unique.len(), names.len());
            proptest::prop_assert_eq!(
                *names.last().unwrap(),
                format!("M{}", imports.len() - 1)
            );
            for (pos, mf) in loaded.iter().enumerate() {
                for import in &mf.module.imports {
                    let at = names
                        .iter()
                        .position(|n| *n == import.as_str())
                        .expect("imports load before their importer");
                    proptest::prop_assert!(at < pos);
                }
            }
        }
    }
}
