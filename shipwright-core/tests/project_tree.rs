use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use shipwright_core::{
    ConfigOverrides, ImageTree, Selection, ShipwrightConfig, StdFileSystem, list_images,
};

static UNIQUE_COUNTER: AtomicUsize = AtomicUsize::new(0);

struct TempProject {
    root: PathBuf,
}

impl TempProject {
    fn new() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time")
            .as_nanos();
        let counter = UNIQUE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!("shipwright_tree_{nanos}_{counter}"));
        std::fs::create_dir_all(&root).expect("create root");
        Self { root }
    }

    fn write(&self, rel_path: &str, contents: &str) {
        let path = self.root.join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create dir");
        }
        std::fs::write(path, contents).expect("write file");
    }

    fn path(&self) -> &Path {
        &self.root
    }
}

impl Drop for TempProject {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn example_project() -> TempProject {
    let project = TempProject::new();
    project.write(".shipwright.json", r#"{"namespace": "shipwright"}"#);
    project.write("base/Dockerfile", "FROM ubuntu:22.04\nCOPY . /base\n");
    project.write("shared/Dockerfile", "FROM shipwright/base\nCOPY lib /lib\n");
    project.write("shared/lib/util.sh", "#!/bin/sh\n");
    project.write("service1/Dockerfile", "FROM shipwright/shared\n");
    project.write("service2/Dockerfile", "FROM shipwright/service1\n");
    project.write("service3/Dockerfile", "FROM shipwright/service1\n");
    project.write("independent/Dockerfile", "FROM busybox\n");
    project.write(".hidden/Dockerfile", "FROM scratch\n");
    project
}

fn tree(project: &TempProject) -> ImageTree {
    let fs = StdFileSystem::new();
    let config = ShipwrightConfig::load(&fs, project.path(), &ConfigOverrides::default())
        .expect("config");
    let images = list_images(&fs, &config.namespace, &config.names, project.path()).expect("images");
    ImageTree::new(images).expect("tree")
}

fn short_names(images: &[&shipwright_core::Image]) -> Vec<String> {
    images.iter().map(|image| image.short_name.clone()).collect()
}

#[test]
fn discovers_images_in_build_order() {
    let project = example_project();
    let tree = tree(&project);

    assert_eq!(
        short_names(&tree.images()),
        vec!["base", "independent", "shared", "service1", "service2", "service3"]
    );
    let shared = tree.find("shared").expect("shared");
    assert_eq!(shared.name, "shipwright/shared");
    assert_eq!(
        tree.parent_of(shared).map(|image| image.short_name.as_str()),
        Some("base")
    );
    assert!(tree.parent_of(tree.find("independent").expect("independent")).is_none());
}

#[test]
fn selections_follow_the_dependency_tree() {
    let project = example_project();
    let tree = tree(&project);

    let upto = Selection {
        upto: vec!["service1".to_string()],
        ..Selection::default()
    };
    assert_eq!(
        short_names(&tree.select(&upto).expect("upto")),
        vec!["base", "shared", "service1"]
    );

    let dependents = Selection {
        dependents: vec!["service1".to_string()],
        exclude: vec!["service3".to_string()],
        ..Selection::default()
    };
    assert_eq!(
        short_names(&tree.select(&dependents).expect("dependents")),
        vec!["base", "shared", "service1", "service2"]
    );

    let exclude = Selection {
        exclude: vec!["shared".to_string()],
        ..Selection::default()
    };
    assert_eq!(
        short_names(&tree.select(&exclude).expect("exclude")),
        vec!["base", "independent"]
    );
}

#[test]
fn explicit_names_override_directory_names() {
    let project = example_project();
    project.write(
        ".shipwright.json",
        r#"{"namespace": "shipwright", "names": {"independent": "registry.example.com/tools/independent"}}"#,
    );
    let tree = tree(&project);

    let independent = tree
        .find("registry.example.com/tools/independent")
        .expect("renamed image");
    assert_eq!(independent.path, project.path().join("independent/Dockerfile"));
    assert!(tree.find("shipwright/independent").is_err());
}
