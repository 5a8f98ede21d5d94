use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use handtrack::hand::ModelComplexity;

const THIRDPARTY_DIR: &str = "3rdparty";

/// Returns the paths listed in the attribution table of `3rdparty/README.md`.
fn attributed_paths() -> HashSet<String> {
    let file = fs::read_to_string(format!("{}/README.md", THIRDPARTY_DIR)).unwrap();

    let mut paths = HashSet::new();
    let mut in_table = false;
    for line in file.lines() {
        if in_table {
            if line.starts_with('|') {
                let rest = &line[line.find('`').unwrap() + 1..];
                let path = &rest[..rest.find('`').unwrap()];
                paths.insert(path.to_string());
            } else {
                break;
            }
        } else if line.starts_with("|---") {
            in_table = true;
        }
    }
    paths
}

#[test]
fn thirdparty_attribution() {
    let attributed = attributed_paths();

    let files = walkdir(THIRDPARTY_DIR.as_ref());
    assert!(!files.is_empty());
    for path in files {
        let path = path.to_str().unwrap();
        assert!(path.starts_with(THIRDPARTY_DIR));
        let path = &path[THIRDPARTY_DIR.len() + 1..];
        if path.ends_with("README.md") {
            continue;
        }

        if !attributed.contains(path) {
            panic!("3rdparty file `{}` is not attributed in readme", path);
        }
    }
}

#[test]
fn networks_are_attributed() {
    let attributed = attributed_paths();
    for complexity in ModelComplexity::ALL {
        for file in [
            complexity.palm_detection_file(),
            complexity.hand_landmark_file(),
        ] {
            let path = format!("onnx/{file}");
            assert!(
                attributed.contains(&path),
                "network `{path}` is missing from the 3rdparty readme"
            );
        }
    }
}

fn walkdir(dir: &Path) -> Vec<PathBuf> {
    let mut vec = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();

        if entry.file_name().into_string().unwrap().starts_with('.') {
            continue;
        }

        if entry.file_type().unwrap().is_dir() {
            vec.extend(walkdir(entry.path().as_path()));
        } else {
            vec.push(entry.path());
        }
    }
    vec
}
