//! Collaborators shared by the export and import workflows.

use std::path::PathBuf;

use tracing::info;

use crate::archive::Archiver;
use crate::config::Config;
use crate::container::ContainerImage;
use crate::error::Result;
use crate::prompt::Prompter;
use crate::runner::Runner;
use crate::temp::TempTracker;
use crate::virsh::Virsh;

/// Everything a workflow needs from the outside world.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub config: &'a Config,
    pub runner: &'a dyn Runner,
    pub prompter: &'a dyn Prompter,
    pub tracker: &'a TempTracker,
}

impl<'a> Context<'a> {
    pub fn new(
        config: &'a Config,
        runner: &'a dyn Runner,
        prompter: &'a dyn Prompter,
        tracker: &'a TempTracker,
    ) -> Self {
        Self {
            config,
            runner,
            prompter,
            tracker,
        }
    }

    pub fn virsh(&self) -> Virsh<'a> {
        Virsh::new(self.runner, self.config.connect_uri.clone())
    }

    /// Archiver for this run.
    ///
    /// With a container configured, the image is (re)built as needed and the
    /// backup directory plus the run's temp root are mounted into it.
    pub fn archiver(&self) -> Result<Archiver<'a>> {
        let Some(name) = &self.config.container_image else {
            return Ok(Archiver::host(self.runner));
        };

        let image = ContainerImage::new(self.runner, name.clone());
        if self.config.rebuild_image && image.exists()? {
            image.remove()?;
        }
        if image.ensure(self.tracker)? {
            info!(image = %name, "container image built");
        }

        let mounts: Vec<PathBuf> = vec![
            self.config.backup_dir.clone(),
            self.tracker.ensure_root()?.to_path_buf(),
        ];
        Ok(Archiver::in_container(self.runner, image, mounts))
    }
}
