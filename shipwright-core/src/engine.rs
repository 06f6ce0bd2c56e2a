//! Build, tag and push orchestration.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::dependencies::{ImageTree, Selection};
use crate::docker::{BuildRequest, Docker};
use crate::error::{Result, ShipwrightError};
use crate::event::{Event, Record};
use crate::image::with_parent;
use crate::registry::{Registry, split_image};
use crate::source_control::{GitRunner, GitSourceControl, Target};

/// Where previously built images are looked up before building.
pub enum CacheStrategy {
    /// Only images already in the local docker store count.
    Local,
    /// Missing images are pulled from their registry.
    Pull,
    /// Registries with credentials are queried directly; tags are aliased
    /// registry-side without moving image data.
    Registry(Box<dyn Registry>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Availability {
    Local,
    Registry,
}

/// Builds and publishes the images of one project.
pub struct Shipwright<G: GitRunner, D: Docker> {
    scm: GitSourceControl<G>,
    docker: D,
    tree: ImageTree,
    cache: CacheStrategy,
    tags: Vec<String>,
}

impl<G: GitRunner, D: Docker> Shipwright<G, D> {
    /// Create an engine applying `tags` to every built image.
    pub fn new(
        scm: GitSourceControl<G>,
        docker: D,
        tree: ImageTree,
        cache: CacheStrategy,
        tags: Vec<String>,
    ) -> Self {
        Self {
            scm,
            docker,
            tree,
            cache,
            tags,
        }
    }

    /// Targets selected by `selection`, parents first.
    pub fn targets(&self, selection: &Selection, dirty: bool) -> Result<Vec<Target>> {
        let all = self.all_targets(dirty)?;
        self.select_targets(&all, selection)
    }

    /// `name:ref` of every selected image.
    pub fn images(&self, selection: &Selection, dirty: bool) -> Result<Vec<String>> {
        Ok(self
            .targets(selection, dirty)?
            .iter()
            .map(Target::reference)
            .collect())
    }

    /// Build every selected image that is not cached, then tag the results.
    ///
    /// Per-image failures are reported as error events; descendants of a
    /// failed image are skipped. Returns the targets that are available.
    pub fn build(
        &self,
        selection: &Selection,
        dirty: bool,
        sink: &mut dyn FnMut(Event),
    ) -> Result<Vec<Target>> {
        let ready = self.build_targets(selection, dirty, sink)?;
        for (target, availability) in &ready {
            self.apply_tags(target, *availability, sink)?;
        }
        Ok(ready.into_iter().map(|(target, _)| target).collect())
    }

    /// Push every selected image under its git ref and all tags.
    ///
    /// Images on a registry with a login are tagged registry-side while
    /// pushing, so the build step leaves their tags alone.
    pub fn push(
        &self,
        selection: &Selection,
        dirty: bool,
        no_build: bool,
        sink: &mut dyn FnMut(Event),
    ) -> Result<()> {
        let targets = if no_build {
            self.targets(selection, dirty)?
        } else {
            let ready = self.build_targets(selection, dirty, sink)?;
            for (target, availability) in &ready {
                if self.direct_registry(target).is_none() {
                    self.apply_tags(target, *availability, sink)?;
                }
            }
            ready.into_iter().map(|(target, _)| target).collect()
        };
        for target in &targets {
            self.push_target(target, sink)?;
        }
        Ok(())
    }

    fn all_targets(&self, dirty: bool) -> Result<Vec<Target>> {
        self.scm.targets(&self.tree, &self.tree.images(), dirty)
    }

    fn select_targets(&self, all: &[Target], selection: &Selection) -> Result<Vec<Target>> {
        let selected: BTreeSet<&str> = self
            .tree
            .select(selection)?
            .into_iter()
            .map(|image| image.name.as_str())
            .collect();
        Ok(all
            .iter()
            .filter(|target| selected.contains(target.image.name.as_str()))
            .cloned()
            .collect())
    }

    /// Registry that serves `target` directly, when one has a login for it.
    fn direct_registry(&self, target: &Target) -> Option<&dyn Registry> {
        match &self.cache {
            CacheStrategy::Registry(registry)
                if registry.handles(&split_image(&target.image.name).server) =>
            {
                Some(registry.as_ref())
            }
            _ => None,
        }
    }

    fn build_targets(
        &self,
        selection: &Selection,
        dirty: bool,
        sink: &mut dyn FnMut(Event),
    ) -> Result<Vec<(Target, Availability)>> {
        let all = self.all_targets(dirty)?;
        let refs: BTreeMap<&str, String> = all
            .iter()
            .map(|target| (target.image.name.as_str(), target.reference()))
            .collect();
        let selected = self.select_targets(&all, selection)?;

        let mut failed: BTreeSet<String> = BTreeSet::new();
        let mut ready = Vec::new();
        for target in selected {
            let parent = self.tree.parent_of(&target.image);
            if let Some(parent) = parent.filter(|parent| failed.contains(&parent.name)) {
                sink(Event::BuildMsg {
                    image: target.image.name.clone(),
                    record: Record::error(format!(
                        "skipped {}: parent {} failed to build",
                        target.reference(),
                        parent.name
                    )),
                });
                failed.insert(target.image.name.clone());
                continue;
            }

            if let Some(availability) = self.lookup(&target)? {
                log::info!("found cached image {}", target.reference());
                ready.push((target, availability));
                continue;
            }

            let parent_ref = parent.and_then(|parent| refs.get(parent.name.as_str()));
            match self.build_one(&target, parent_ref.map(String::as_str), sink) {
                Ok(()) => ready.push((target, Availability::Local)),
                Err(err) => {
                    sink(Event::BuildMsg {
                        image: target.image.name.clone(),
                        record: Record::error(err.to_string()),
                    });
                    failed.insert(target.image.name.clone());
                }
            }
        }
        Ok(ready)
    }

    fn lookup(&self, target: &Target) -> Result<Option<Availability>> {
        let reference = target.reference();
        if self.docker.image_exists(&reference)? {
            return Ok(Some(Availability::Local));
        }
        match &self.cache {
            CacheStrategy::Local => Ok(None),
            CacheStrategy::Pull => self.pull(&reference),
            CacheStrategy::Registry(registry) => {
                let location = split_image(&target.image.name);
                if !registry.handles(&location.server) {
                    return self.pull(&reference);
                }
                match registry.manifest(&location, &target.git_ref)? {
                    Some(_) => Ok(Some(Availability::Registry)),
                    None => Ok(None),
                }
            }
        }
    }

    fn pull(&self, reference: &str) -> Result<Option<Availability>> {
        if self.docker.pull(reference)? {
            Ok(Some(Availability::Local))
        } else {
            Ok(None)
        }
    }

    fn build_one(
        &self,
        target: &Target,
        parent_ref: Option<&str>,
        sink: &mut dyn FnMut(Event),
    ) -> Result<()> {
        let image = &target.image;
        let reference = target.reference();
        log::info!("building {reference}");

        let rewritten = match parent_ref {
            Some(parent_ref) => Some(RewrittenDockerfile::write(target, parent_ref)?),
            None => None,
        };
        let dockerfile = rewritten
            .as_ref()
            .map(|file| file.path.as_path())
            .unwrap_or(image.path.as_path());

        let request = BuildRequest {
            reference: &reference,
            dockerfile,
            context: &image.dir_path,
        };
        self.docker.build(&request, &mut |line: String| {
            sink(Event::BuildMsg {
                image: image.name.clone(),
                record: build_record(&line),
            })
        })
    }

    fn apply_tags(
        &self,
        target: &Target,
        availability: Availability,
        sink: &mut dyn FnMut(Event),
    ) -> Result<()> {
        let image = &target.image;
        let old_image = target.reference();
        for tag in self.tags_for(target) {
            let result = match (&self.cache, availability) {
                (CacheStrategy::Registry(registry), Availability::Registry) => {
                    self.alias(registry.as_ref(), target, &tag).map(|()| Event::Alias {
                        old_image: old_image.clone(),
                        repository: image.name.clone(),
                        tag: tag.clone(),
                    })
                }
                _ => self
                    .docker
                    .tag(&old_image, &image.name, &tag)
                    .map(|()| Event::Tag {
                        old_image: old_image.clone(),
                        repository: image.name.clone(),
                        tag: tag.clone(),
                    }),
            };
            match result {
                Ok(event) => sink(event),
                Err(err) => sink(Event::BuildMsg {
                    image: image.name.clone(),
                    record: Record::error(format!("tagging {old_image} as {tag}: {err}")),
                }),
            }
        }
        Ok(())
    }

    fn push_target(&self, target: &Target, sink: &mut dyn FnMut(Event)) -> Result<()> {
        let image = &target.image;
        if let Some(registry) = self.direct_registry(target) {
            return self.push_direct(registry, target, sink);
        }

        let mut references = vec![target.reference()];
        references.extend(
            self.tags_for(target)
                .into_iter()
                .map(|tag| format!("{}:{tag}", image.name)),
        );
        for reference in references {
            self.push_reference(&image.name, &reference, sink);
        }
        Ok(())
    }

    fn push_direct(
        &self,
        registry: &dyn Registry,
        target: &Target,
        sink: &mut dyn FnMut(Event),
    ) -> Result<()> {
        let image = &target.image;
        let location = split_image(&image.name);
        let reference = target.reference();
        if registry.manifest(&location, &target.git_ref)?.is_none()
            && !self.push_reference(&image.name, &reference, sink)
        {
            return Ok(());
        }

        for tag in self.tags_for(target) {
            match self.alias(registry, target, &tag) {
                Ok(()) => sink(Event::Alias {
                    old_image: reference.clone(),
                    repository: image.name.clone(),
                    tag,
                }),
                Err(err) => sink(Event::Push {
                    image: image.name.clone(),
                    record: Record::error(format!("aliasing {reference} as {tag}: {err}")),
                }),
            }
        }
        Ok(())
    }

    fn push_reference(&self, name: &str, reference: &str, sink: &mut dyn FnMut(Event)) -> bool {
        log::info!("pushing {reference}");
        let result = self.docker.push(reference, &mut |line: String| {
            sink(Event::Push {
                image: name.to_string(),
                record: Record::from_progress_line(&line),
            })
        });
        match result {
            Ok(()) => true,
            Err(err) => {
                sink(Event::Push {
                    image: name.to_string(),
                    record: Record::error(err.to_string()),
                });
                false
            }
        }
    }

    fn alias(&self, registry: &dyn Registry, target: &Target, tag: &str) -> Result<()> {
        let location = split_image(&target.image.name);
        let manifest = registry
            .manifest(&location, &target.git_ref)?
            .ok_or_else(|| {
                ShipwrightError::Other(format!("{} not found in registry", target.reference()))
            })?;
        registry.put_manifest(&location, tag, &manifest)
    }

    fn tags_for(&self, target: &Target) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for tag in self.tags.iter().chain(target.image.extra_tags.iter()) {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        tags
    }
}

fn build_record(line: &str) -> Record {
    let trimmed = line.trim_start();
    match trimmed
        .strip_prefix("WARNING:")
        .or_else(|| trimmed.strip_prefix("[WARNING]"))
    {
        Some(warning) => Record::warning(warning.trim()),
        None => Record::stream(line),
    }
}

static REWRITE_COUNTER: AtomicUsize = AtomicUsize::new(0);

struct RewrittenDockerfile {
    path: PathBuf,
}

impl RewrittenDockerfile {
    fn write(target: &Target, parent_ref: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(&target.image.path)?;
        let file_name = format!(
            "shipwright-{}-{}-{}-{}.Dockerfile",
            target.image.name.replace(['/', ':'], "_"),
            target.git_ref,
            std::process::id(),
            REWRITE_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let path = std::env::temp_dir().join(file_name);
        std::fs::write(&path, with_parent(&contents, parent_ref))?;
        Ok(Self { path })
    }
}

impl Drop for RewrittenDockerfile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            log::debug!("could not remove {}: {err}", self.path.display());
        }
    }
}
