//! Host runtime steps: state directories and image mounts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kiln_id::VmId;
use kiln_reconcile::{BoxProcedure, Procedure};
use tracing::debug;

use super::names;
use super::StepError;
use crate::models::{ImageUse, MicroVm, Mount};
use crate::ports::{FileSystem, ImageMountSpec, ImageService};

/// `<root>/vm/<vmid>`: where a VM's runtime files live.
pub fn vm_state_dir(root: &Path, id: &VmId) -> PathBuf {
    root.join("vm").join(id.to_string())
}

/// Creates the VM's state directory and records it in the status.
pub struct StateDirCreate {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl StateDirCreate {
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            root: root.into(),
            fs,
        }
    }
}

#[async_trait]
impl Procedure<MicroVm> for StateDirCreate {
    fn name(&self) -> &str {
        names::MICROVM_STATE_DIR_CREATE
    }

    async fn should_do(&self, vm: &MicroVm) -> Result<bool> {
        let dir = &vm.status.runtime_state_dir;
        if dir.is_empty() {
            return Ok(true);
        }

        let exists = self
            .fs
            .exists(Path::new(dir))
            .await
            .with_context(|| format!("checking if vm state directory {dir} exists"))?;
        Ok(!exists)
    }

    async fn execute(&self, vm: &mut MicroVm) -> Result<Vec<BoxProcedure<MicroVm>>> {
        if vm.status.runtime_state_dir.is_empty() {
            vm.status.runtime_state_dir = vm_state_dir(&self.root, &vm.id)
                .to_string_lossy()
                .into_owned();
        }

        let dir = PathBuf::from(&vm.status.runtime_state_dir);
        debug!(vmid = %vm.id, dir = %dir.display(), "Creating vm state directory");

        self.fs
            .create_dir_all(&dir)
            .await
            .with_context(|| format!("creating directory {}", dir.display()))?;

        Ok(vec![])
    }
}

/// Removes a directory tree.
pub struct DirDelete {
    dir: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl DirDelete {
    pub fn new(dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            dir: dir.into(),
            fs,
        }
    }
}

#[async_trait]
impl Procedure<MicroVm> for DirDelete {
    fn name(&self) -> &str {
        names::IO_DELETE_DIR
    }

    async fn should_do(&self, _vm: &MicroVm) -> Result<bool> {
        self.fs
            .exists(&self.dir)
            .await
            .with_context(|| format!("checking if dir {} exists", self.dir.display()))
    }

    async fn execute(&self, _vm: &mut MicroVm) -> Result<Vec<BoxProcedure<MicroVm>>> {
        if self.fs.exists(&self.dir).await? {
            self.fs
                .remove_dir_all(&self.dir)
                .await
                .with_context(|| format!("deleting directory {}", self.dir.display()))?;
        }
        Ok(vec![])
    }
}

/// Checks whether a recorded mount is still in place.
async fn still_mounted(
    images: &dyn ImageService,
    mount: Option<&Mount>,
    spec: &ImageMountSpec,
) -> Result<bool> {
    match mount {
        Some(m) if !m.source.is_empty() => images
            .is_mounted(spec)
            .await
            .with_context(|| format!("checking if image {} is mounted", spec.image_name)),
        _ => Ok(false),
    }
}

/// Pulls and mounts an image, returning the first mount.
async fn mount_first(images: &dyn ImageService, spec: &ImageMountSpec) -> Result<Mount> {
    let mounts = images.pull_and_mount(spec).await.with_context(|| {
        format!(
            "mount images {} for {:?} use",
            spec.image_name, spec.usage
        )
    })?;

    mounts
        .into_iter()
        .next()
        .ok_or_else(|| StepError::NoMount(spec.image_name.clone()).into())
}

/// Mounts a container-backed volume.
pub struct VolumeMount {
    volume_id: String,
    image: String,
    images: Arc<dyn ImageService>,
}

impl VolumeMount {
    pub fn new(
        volume_id: impl Into<String>,
        image: impl Into<String>,
        images: Arc<dyn ImageService>,
    ) -> Self {
        Self {
            volume_id: volume_id.into(),
            image: image.into(),
            images,
        }
    }

    fn mount_spec(&self, vm: &MicroVm) -> ImageMountSpec {
        ImageMountSpec {
            image_name: self.image.clone(),
            owner: vm.id.to_string(),
            owner_usage_id: self.volume_id.clone(),
            usage: ImageUse::Volume,
        }
    }
}

#[async_trait]
impl Procedure<MicroVm> for VolumeMount {
    fn name(&self) -> &str {
        names::RUNTIME_VOLUME_MOUNT
    }

    async fn should_do(&self, vm: &MicroVm) -> Result<bool> {
        let mount = vm
            .status
            .volume(&self.volume_id)
            .and_then(|s| s.mount.as_ref());
        let mounted = still_mounted(self.images.as_ref(), mount, &self.mount_spec(vm)).await?;
        Ok(!mounted)
    }

    async fn execute(&self, vm: &mut MicroVm) -> Result<Vec<BoxProcedure<MicroVm>>> {
        debug!(vmid = %vm.id, volume = %self.volume_id, "Mounting volume");

        let mount = mount_first(self.images.as_ref(), &self.mount_spec(vm)).await?;
        vm.status.volume_mut(&self.volume_id).mount = Some(mount);
        Ok(vec![])
    }
}

/// Mounts the kernel image.
pub struct KernelMount {
    images: Arc<dyn ImageService>,
}

impl KernelMount {
    pub fn new(images: Arc<dyn ImageService>) -> Self {
        Self { images }
    }

    fn mount_spec(vm: &MicroVm) -> ImageMountSpec {
        ImageMountSpec {
            image_name: vm.spec.kernel.image.clone(),
            owner: vm.id.to_string(),
            owner_usage_id: "kernel".to_string(),
            usage: ImageUse::Kernel,
        }
    }
}

#[async_trait]
impl Procedure<MicroVm> for KernelMount {
    fn name(&self) -> &str {
        names::RUNTIME_KERNEL_MOUNT
    }

    async fn should_do(&self, vm: &MicroVm) -> Result<bool> {
        let mounted = still_mounted(
            self.images.as_ref(),
            vm.status.kernel_mount.as_ref(),
            &Self::mount_spec(vm),
        )
        .await?;
        Ok(!mounted)
    }

    async fn execute(&self, vm: &mut MicroVm) -> Result<Vec<BoxProcedure<MicroVm>>> {
        if vm.spec.kernel.image.is_empty() {
            return Err(StepError::KernelImageRequired.into());
        }
        debug!(vmid = %vm.id, image = %vm.spec.kernel.image, "Mounting kernel");

        let mount = mount_first(self.images.as_ref(), &Self::mount_spec(vm)).await?;
        vm.status.kernel_mount = Some(mount);
        Ok(vec![])
    }
}

/// Mounts the initrd image, if one is configured.
pub struct InitrdMount {
    images: Arc<dyn ImageService>,
}

impl InitrdMount {
    pub fn new(images: Arc<dyn ImageService>) -> Self {
        Self { images }
    }

    fn mount_spec(vm: &MicroVm, image: &str) -> ImageMountSpec {
        ImageMountSpec {
            image_name: image.to_string(),
            owner: vm.id.to_string(),
            owner_usage_id: "initrd".to_string(),
            usage: ImageUse::Initrd,
        }
    }
}

#[async_trait]
impl Procedure<MicroVm> for InitrdMount {
    fn name(&self) -> &str {
        names::RUNTIME_INITRD_MOUNT
    }

    async fn should_do(&self, vm: &MicroVm) -> Result<bool> {
        let Some(initrd) = vm.spec.initrd.as_ref() else {
            return Ok(false);
        };

        let mounted = still_mounted(
            self.images.as_ref(),
            vm.status.initrd_mount.as_ref(),
            &Self::mount_spec(vm, &initrd.image),
        )
        .await?;
        Ok(!mounted)
    }

    async fn execute(&self, vm: &mut MicroVm) -> Result<Vec<BoxProcedure<MicroVm>>> {
        let Some(image) = vm.spec.initrd.as_ref().map(|i| i.image.clone()) else {
            return Ok(vec![]);
        };
        debug!(vmid = %vm.id, image = %image, "Mounting initrd");

        let mount = mount_first(self.images.as_ref(), &Self::mount_spec(vm, &image)).await?;
        vm.status.initrd_mount = Some(mount);
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use crate::mock::MockImageService;
    use crate::models::{Initrd, Kernel, MicroVmSpec, MountType};

    fn test_vm() -> MicroVm {
        MicroVm::new(
            VmId::parse("ns/vm1/uid1").unwrap(),
            MicroVmSpec {
                kernel: Kernel {
                    image: "ghcr.io/kiln/kernel:6.1".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_vm_state_dir_layout() {
        let id = VmId::parse("ns/vm1/uid1").unwrap();
        assert_eq!(
            vm_state_dir(Path::new("/var/lib/kiln"), &id),
            PathBuf::from("/var/lib/kiln/vm/ns/vm1/uid1")
        );
    }

    #[tokio::test]
    async fn test_state_dir_create_records_path() {
        let fs = Arc::new(MemoryFileSystem::new());
        let step = StateDirCreate::new("/state", fs.clone());
        let mut vm = test_vm();

        assert!(step.should_do(&vm).await.unwrap());
        step.execute(&mut vm).await.unwrap();

        assert_eq!(vm.status.runtime_state_dir, "/state/vm/ns/vm1/uid1");
        assert!(fs.is_dir(Path::new("/state/vm/ns/vm1/uid1")).await.unwrap());
        assert!(!step.should_do(&vm).await.unwrap());
    }

    #[tokio::test]
    async fn test_state_dir_recreated_when_missing() {
        let fs = Arc::new(MemoryFileSystem::new());
        let step = StateDirCreate::new("/state", fs.clone());
        let mut vm = test_vm();
        vm.status.runtime_state_dir = "/elsewhere/vm1".to_string();

        assert!(step.should_do(&vm).await.unwrap());
        step.execute(&mut vm).await.unwrap();
        assert_eq!(vm.status.runtime_state_dir, "/elsewhere/vm1");
        assert!(fs.exists(Path::new("/elsewhere/vm1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_dir_delete() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.create_dir_all(Path::new("/state/vm/ns/vm1")).await.unwrap();
        let step = DirDelete::new("/state/vm/ns/vm1", fs.clone());
        let mut vm = test_vm();

        assert!(step.should_do(&vm).await.unwrap());
        step.execute(&mut vm).await.unwrap();
        assert!(!step.should_do(&vm).await.unwrap());
        assert!(fs.exists(Path::new("/state/vm/ns")).await.unwrap());
    }

    #[tokio::test]
    async fn test_volume_mount_records_first_mount() {
        let images = Arc::new(MockImageService::new());
        let step = VolumeMount::new("root", "docker.io/library/ubuntu:22.04", images.clone());
        let mut vm = test_vm();

        assert!(step.should_do(&vm).await.unwrap());
        step.execute(&mut vm).await.unwrap();

        let mount = vm.status.volume("root").and_then(|s| s.mount.clone()).unwrap();
        assert_eq!(mount.mount_type, MountType::Dev);
        assert!(!mount.source.is_empty());
        assert!(!step.should_do(&vm).await.unwrap());

        let pulls = images.pulls();
        assert_eq!(pulls.len(), 1);
        assert_eq!(pulls[0].owner, "ns/vm1/uid1");
        assert_eq!(pulls[0].owner_usage_id, "root");
        assert_eq!(pulls[0].usage, ImageUse::Volume);
    }

    #[tokio::test]
    async fn test_volume_mount_without_mounts_fails() {
        let images = Arc::new(MockImageService::new().returning_no_mounts());
        let step = VolumeMount::new("root", "docker.io/library/ubuntu:22.04", images);
        let mut vm = test_vm();

        let err = step.execute(&mut vm).await.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<StepError>(),
            Some(StepError::NoMount(_))
        ));
        assert!(vm.status.volume("root").is_none());
    }

    #[tokio::test]
    async fn test_volume_mount_redone_when_unmounted() {
        let images = Arc::new(MockImageService::new());
        let step = VolumeMount::new("root", "docker.io/library/ubuntu:22.04", images.clone());
        let mut vm = test_vm();
        step.execute(&mut vm).await.unwrap();

        images.unmount_all();
        assert!(step.should_do(&vm).await.unwrap());
    }

    #[tokio::test]
    async fn test_kernel_mount_requires_image() {
        let step = KernelMount::new(Arc::new(MockImageService::new()));
        let mut vm = test_vm();
        vm.spec.kernel.image.clear();

        let err = step.execute(&mut vm).await.err().unwrap();
        assert_eq!(
            err.downcast_ref::<StepError>(),
            Some(&StepError::KernelImageRequired)
        );
    }

    #[tokio::test]
    async fn test_kernel_mount() {
        let step = KernelMount::new(Arc::new(MockImageService::new()));
        let mut vm = test_vm();

        assert!(step.should_do(&vm).await.unwrap());
        step.execute(&mut vm).await.unwrap();
        assert!(vm.status.kernel_mount.is_some());
        assert!(!step.should_do(&vm).await.unwrap());
    }

    #[tokio::test]
    async fn test_initrd_mount_only_when_configured() {
        let step = InitrdMount::new(Arc::new(MockImageService::new()));
        let mut vm = test_vm();
        assert!(!step.should_do(&vm).await.unwrap());

        vm.spec.initrd = Some(Initrd {
            image: "ghcr.io/kiln/initrd:1".to_string(),
            filename: None,
        });
        assert!(step.should_do(&vm).await.unwrap());
        step.execute(&mut vm).await.unwrap();
        assert!(vm.status.initrd_mount.is_some());
        assert!(!step.should_do(&vm).await.unwrap());
    }
}
