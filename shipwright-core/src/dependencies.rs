//! Image dependency tree and target selection.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, ShipwrightError};
use crate::image::Image;

/// Which images to operate on.
///
/// Names match either the short or the full image name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Images to build on their own.
    pub exact: Vec<String>,
    /// Images to build together with their ancestors and descendants.
    pub dependents: Vec<String>,
    /// Images to build together with their ancestors.
    pub upto: Vec<String>,
    /// Images to leave out together with their descendants.
    pub exclude: Vec<String>,
}

impl Selection {
    /// Whether no image was named at all.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
            && self.dependents.is_empty()
            && self.upto.is_empty()
            && self.exclude.is_empty()
    }
}

/// Images of a project linked parent to child.
#[derive(Debug, Clone)]
pub struct ImageTree {
    images: Vec<Image>,
    parents: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl ImageTree {
    /// Link images through their `FROM` references.
    ///
    /// Fails on duplicate image names and on parent cycles.
    pub fn new(images: Vec<Image>) -> Result<Self> {
        let mut by_name = BTreeMap::new();
        for (idx, image) in images.iter().enumerate() {
            if by_name.insert(image.name.clone(), idx).is_some() {
                return Err(ShipwrightError::Other(format!(
                    "duplicate image name: {}",
                    image.name
                )));
            }
        }

        let parents: Vec<Option<usize>> = images
            .iter()
            .map(|image| {
                image
                    .parent
                    .as_deref()
                    .map(repository_of)
                    .and_then(|repo| by_name.get(repo).copied())
            })
            .collect();

        let mut children = vec![Vec::new(); images.len()];
        for (idx, parent) in parents.iter().enumerate() {
            if let Some(parent) = parent {
                children[*parent].push(idx);
            }
        }

        let order = breadth_first(&images, &parents, &children);
        if order.len() != images.len() {
            let placed: BTreeSet<usize> = order.iter().copied().collect();
            let cyclic: Vec<&str> = (0..images.len())
                .filter(|idx| !placed.contains(idx))
                .map(|idx| images[idx].name.as_str())
                .collect();
            return Err(ShipwrightError::Other(format!(
                "images form a dependency cycle: {}",
                cyclic.join(", ")
            )));
        }

        Ok(Self {
            images,
            parents,
            children,
            order,
        })
    }

    /// All images, parents before children.
    pub fn images(&self) -> Vec<&Image> {
        self.order.iter().map(|idx| &self.images[*idx]).collect()
    }

    /// Look up an image by short or full name.
    pub fn find(&self, name: &str) -> Result<&Image> {
        self.index_of(name).map(|idx| &self.images[idx])
    }

    /// The in-project parent of an image, if its parent is built here.
    pub fn parent_of(&self, image: &Image) -> Option<&Image> {
        let idx = self.index_of(&image.name).ok()?;
        self.parents[idx].map(|parent| &self.images[parent])
    }

    /// In-project ancestors of the named image, root first.
    pub fn ancestors(&self, name: &str) -> Result<Vec<&Image>> {
        let idx = self.index_of(name)?;
        let mut chain = self.ancestor_indices(idx);
        chain.reverse();
        Ok(chain.into_iter().map(|idx| &self.images[idx]).collect())
    }

    /// Every descendant of the named image, in build order.
    pub fn descendants(&self, name: &str) -> Result<Vec<&Image>> {
        let idx = self.index_of(name)?;
        let found = self.descendant_indices(idx);
        Ok(self
            .order
            .iter()
            .filter(|idx| found.contains(idx))
            .map(|idx| &self.images[*idx])
            .collect())
    }

    /// Resolve a selection into images, in build order.
    pub fn select(&self, selection: &Selection) -> Result<Vec<&Image>> {
        let mut chosen: BTreeSet<usize> = BTreeSet::new();
        let only_exclusions = selection.exact.is_empty()
            && selection.dependents.is_empty()
            && selection.upto.is_empty();
        if only_exclusions {
            chosen.extend(0..self.images.len());
        }

        for name in &selection.exact {
            chosen.insert(self.index_of(name)?);
        }
        for name in &selection.upto {
            let idx = self.index_of(name)?;
            chosen.insert(idx);
            chosen.extend(self.ancestor_indices(idx));
        }
        for name in &selection.dependents {
            let idx = self.index_of(name)?;
            chosen.insert(idx);
            chosen.extend(self.ancestor_indices(idx));
            chosen.extend(self.descendant_indices(idx));
        }
        for name in &selection.exclude {
            let idx = self.index_of(name)?;
            chosen.remove(&idx);
            for descendant in self.descendant_indices(idx) {
                chosen.remove(&descendant);
            }
        }

        Ok(self
            .order
            .iter()
            .filter(|idx| chosen.contains(idx))
            .map(|idx| &self.images[*idx])
            .collect())
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.images
            .iter()
            .position(|image| image.name == name)
            .or_else(|| {
                self.images
                    .iter()
                    .position(|image| image.short_name == name)
            })
            .ok_or_else(|| ShipwrightError::UnknownImage(name.to_string()))
    }

    fn ancestor_indices(&self, idx: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut current = self.parents[idx];
        while let Some(parent) = current {
            chain.push(parent);
            current = self.parents[parent];
        }
        chain
    }

    fn descendant_indices(&self, idx: usize) -> BTreeSet<usize> {
        let mut found = BTreeSet::new();
        let mut pending = self.children[idx].clone();
        while let Some(child) = pending.pop() {
            if found.insert(child) {
                pending.extend(self.children[child].iter().copied());
            }
        }
        found
    }
}

/// Strip a tag or digest from an image reference.
pub fn repository_of(reference: &str) -> &str {
    let without_digest = reference.split('@').next().unwrap_or(reference);
    match without_digest.rfind(':') {
        Some(colon) if !without_digest[colon..].contains('/') => &without_digest[..colon],
        _ => without_digest,
    }
}

fn breadth_first(images: &[Image], parents: &[Option<usize>], children: &[Vec<usize>]) -> Vec<usize> {
    let by_name = |indices: &mut Vec<usize>| {
        indices.sort_by(|a, b| images[*a].name.cmp(&images[*b].name));
    };

    let mut order = Vec::with_capacity(images.len());
    let mut level: Vec<usize> = (0..images.len())
        .filter(|idx| parents[*idx].is_none())
        .collect();
    by_name(&mut level);

    while !level.is_empty() {
        order.extend(level.iter().copied());
        let mut next: Vec<usize> = level
            .iter()
            .flat_map(|idx| children[*idx].iter().copied())
            .collect();
        by_name(&mut next);
        level = next;
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn image(short: &str, parent: &str) -> Image {
        Image {
            name: format!("acme/{short}"),
            short_name: short.to_string(),
            dir_path: PathBuf::from(format!("/proj/{short}")),
            path: PathBuf::from(format!("/proj/{short}/Dockerfile")),
            parent: Some(parent.to_string()),
            copy_paths: BTreeSet::new(),
            extra_tags: Vec::new(),
        }
    }

    fn sample_tree() -> ImageTree {
        ImageTree::new(vec![
            image("service2", "acme/service1"),
            image("independent", "acme/base"),
            image("service3", "acme/shared"),
            image("base", "ubuntu"),
            image("shared", "acme/base:latest"),
            image("service1", "acme/shared"),
        ])
        .expect("tree")
    }

    fn short_names(images: Vec<&Image>) -> Vec<&str> {
        images
            .into_iter()
            .map(|image| image.short_name.as_str())
            .collect()
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn orders_breadth_first_by_name() {
        let tree = sample_tree();
        assert_eq!(
            short_names(tree.images()),
            vec!["base", "independent", "shared", "service1", "service3", "service2"]
        );
    }

    #[test]
    fn empty_selection_selects_everything() {
        let tree = sample_tree();
        let selected = tree.select(&Selection::default()).expect("select");
        assert_eq!(selected.len(), 6);
    }

    #[test]
    fn upto_includes_ancestors() {
        let tree = sample_tree();
        let selection = Selection {
            upto: names(&["service1"]),
            ..Selection::default()
        };
        assert_eq!(
            short_names(tree.select(&selection).expect("select")),
            vec!["base", "shared", "service1"]
        );
    }

    #[test]
    fn dependents_include_ancestors_and_descendants() {
        let tree = sample_tree();
        let selection = Selection {
            dependents: names(&["service1"]),
            ..Selection::default()
        };
        assert_eq!(
            short_names(tree.select(&selection).expect("select")),
            vec!["base", "shared", "service1", "service2"]
        );
    }

    #[test]
    fn exclude_removes_subtrees() {
        let tree = sample_tree();
        let selection = Selection {
            exclude: names(&["service3", "independent"]),
            ..Selection::default()
        };
        assert_eq!(
            short_names(tree.select(&selection).expect("select")),
            vec!["base", "shared", "service1", "service2"]
        );

        let selection = Selection {
            exclude: names(&["service1"]),
            ..Selection::default()
        };
        assert_eq!(
            short_names(tree.select(&selection).expect("select")),
            vec!["base", "independent", "shared", "service3"]
        );
    }

    #[test]
    fn selectors_combine_as_a_union() {
        let tree = sample_tree();
        let selection = Selection {
            dependents: names(&["service1"]),
            upto: names(&["independent"]),
            ..Selection::default()
        };
        assert_eq!(
            short_names(tree.select(&selection).expect("select")),
            vec!["base", "independent", "shared", "service1", "service2"]
        );
    }

    #[test]
    fn exact_selects_only_the_image_and_accepts_full_names() {
        let tree = sample_tree();
        let selection = Selection {
            exact: names(&["acme/service3"]),
            ..Selection::default()
        };
        assert_eq!(
            short_names(tree.select(&selection).expect("select")),
            vec!["service3"]
        );
    }

    #[test]
    fn unknown_names_are_rejected() {
        let tree = sample_tree();
        let selection = Selection {
            upto: names(&["missing"]),
            ..Selection::default()
        };
        match tree.select(&selection) {
            Err(ShipwrightError::UnknownImage(name)) => assert_eq!(name, "missing"),
            other => panic!("expected unknown image error, got {other:?}"),
        }
    }

    #[test]
    fn ancestors_and_descendants_follow_links() {
        let tree = sample_tree();
        assert_eq!(
            short_names(tree.ancestors("service2").expect("ancestors")),
            vec!["base", "shared", "service1"]
        );
        assert_eq!(
            short_names(tree.descendants("shared").expect("descendants")),
            vec!["service1", "service3", "service2"]
        );
        let service1 = tree.find("service1").expect("service1");
        assert_eq!(
            tree.parent_of(service1).map(|image| image.short_name.as_str()),
            Some("shared")
        );
        let base = tree.find("base").expect("base");
        assert!(tree.parent_of(base).is_none());
    }

    #[test]
    fn cycles_and_duplicates_are_errors() {
        let cycle = ImageTree::new(vec![image("a", "acme/b"), image("b", "acme/a")]);
        assert!(cycle.expect_err("cycle").to_string().contains("cycle"));

        let duplicate = ImageTree::new(vec![image("a", "ubuntu"), image("a", "debian")]);
        assert!(duplicate
            .expect_err("duplicate")
            .to_string()
            .contains("duplicate image name"));
    }

    #[test]
    fn repository_of_strips_tags_and_digests() {
        assert_eq!(repository_of("acme/base:latest"), "acme/base");
        assert_eq!(repository_of("localhost:5000/acme/base"), "localhost:5000/acme/base");
        assert_eq!(repository_of("localhost:5000/acme/base:1"), "localhost:5000/acme/base");
        assert_eq!(repository_of("ubuntu@sha256:abc"), "ubuntu");
    }
}
