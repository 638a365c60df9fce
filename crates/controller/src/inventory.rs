use std::{fmt, future::Future, time::Duration};

use async_trait::async_trait;
use tracing::{Level, instrument};

use crate::{
    Error, Result,
    azure::models::{DataDisk, ScaleSetVm},
    config::RemediationConfig,
};

/// Identity of one virtual machine inside a scale set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    pub resource_group: String,
    pub scale_set_name: String,
    pub instance_id: String,
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.resource_group, self.scale_set_name, self.instance_id
        )
    }
}

/// Read/update access to scale-set instances.
#[async_trait]
pub trait ScaleSetInventory: Send + Sync {
    /// Fetch the current model of an instance.
    async fn get_instance(&self, instance: &InstanceRef) -> Result<ScaleSetVm>;

    /// Replace the model of an instance with `vm`.
    async fn update_instance(&self, instance: &InstanceRef, vm: &ScaleSetVm) -> Result<()>;
}

/// Position of the first data disk called `disk_name`.
pub fn locate_disk(disks: &[DataDisk], disk_name: &str) -> Option<usize> {
    disks
        .iter()
        .position(|disk| disk.name.as_deref() == Some(disk_name))
}

/// Copy of `disks` with the entry at `index` left out.
pub fn without_disk(disks: &[DataDisk], index: usize) -> Vec<DataDisk> {
    disks
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, disk)| disk.clone())
        .collect()
}

/// Remove `disk_name` from the data disks of `instance`.
///
/// The fetch and the update are not conditional on each other unless the
/// provider returned an etag with the fetched model.
#[instrument(level = Level::DEBUG, skip(inventory, config))]
pub async fn detach_disk<I>(
    inventory: &I,
    instance: &InstanceRef,
    disk_name: &str,
    config: &RemediationConfig,
) -> Result<()>
where
    I: ScaleSetInventory + ?Sized,
{
    let mut vm = with_deadline(
        config.call_timeout,
        "fetching",
        instance,
        inventory.get_instance(instance),
    )
    .await?;

    let disks = &vm.properties.storage_profile.data_disks;
    let Some(index) = locate_disk(disks, disk_name) else {
        return Err(Error::DiskNotFound {
            disk_name: disk_name.to_string(),
            instance: instance.to_string(),
        });
    };

    vm.properties.storage_profile.data_disks = without_disk(disks, index);

    if config.dry_run {
        tracing::info!(%instance, disk = disk_name, "Dry run, skipping update");
        return Ok(());
    }

    with_deadline(
        config.call_timeout,
        "updating",
        instance,
        inventory.update_instance(instance, &vm),
    )
    .await?;

    tracing::info!(%instance, disk = disk_name, "Detached disk");
    Ok(())
}

async fn with_deadline<T>(
    timeout: Duration,
    what: &str,
    instance: &InstanceRef,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, call).await.map_err(|_| {
        Error::TransientProvider(format!(
            "{what} {instance} timed out after {}s",
            timeout.as_secs()
        ))
    })?
}


#[cfg(test)]
mod tests {
    use super::{fake::*, *};

    fn instance() -> InstanceRef {
        InstanceRef {
            resource_group: "RG1".into(),
            scale_set_name: "vmss-a".into(),
            instance_id: "2".into(),
        }
    }

    fn config() -> RemediationConfig {
        RemediationConfig {
            call_timeout: Duration::from_secs(30),
            dry_run: false,
        }
    }

    fn names(disks: &[DataDisk]) -> Vec<&str> {
        disks.iter().filter_map(|d| d.name.as_deref()).collect()
    }

    #[test]
    fn removal_keeps_order_of_remaining_disks() {
        let disks = vec![disk("A", 0), disk("B", 1), disk("C", 2)];
        let index = locate_disk(&disks, "B").unwrap();
        let remaining = without_disk(&disks, index);

        assert_eq!(names(&remaining), ["A", "C"]);
        assert_eq!(remaining.len(), disks.len() - 1);
        assert_eq!(names(&disks), ["A", "B", "C"]);
    }

    #[test]
    fn removal_only_drops_the_matched_duplicate() {
        let disks = vec![disk("A", 0), disk("B", 1), disk("B", 2)];
        let index = locate_disk(&disks, "B").unwrap();
        let remaining = without_disk(&disks, index);

        assert_eq!(index, 1);
        assert_eq!(remaining, vec![disk("A", 0), disk("B", 2)]);
    }

    #[test]
    fn locate_ignores_unnamed_disks() {
        let mut unnamed = disk("", 0);
        unnamed.name = None;
        assert_eq!(locate_disk(&[unnamed, disk("A", 1)], "A"), Some(1));
        assert_eq!(locate_disk(&[], "A"), None);
    }

    #[tokio::test]
    async fn detaches_named_disk() {
        let inventory = FakeInventory::new(
            instance(),
            vm_with_disks(vec![disk("disk-9", 0), disk("disk-10", 1)]),
        );

        detach_disk(&inventory, &instance(), "disk-9", &config())
            .await
            .unwrap();

        assert_eq!(inventory.update_count(), 1);
        assert_eq!(inventory.disk_names(), ["disk-10"]);
    }

    #[tokio::test]
    async fn missing_disk_fails_without_update() {
        let inventory = FakeInventory::new(instance(), vm_with_disks(vec![disk("disk-10", 1)]));

        let err = detach_disk(&inventory, &instance(), "disk-9", &config())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::DiskNotFound { ref disk_name, ref instance } if disk_name == "disk-9" && instance == "RG1/vmss-a/2"
        ));
        assert_eq!(inventory.update_count(), 0);
    }

    #[tokio::test]
    async fn second_detach_reports_disk_not_found() {
        let inventory = FakeInventory::new(instance(), vm_with_disks(vec![disk("disk-9", 0)]));

        detach_disk(&inventory, &instance(), "disk-9", &config())
            .await
            .unwrap();
        let err = detach_disk(&inventory, &instance(), "disk-9", &config())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DiskNotFound { .. }));
        assert_eq!(inventory.update_count(), 1);
    }

    #[tokio::test]
    async fn unknown_instance_is_not_found() {
        let inventory = FakeInventory::new(instance(), vm_with_disks(vec![disk("disk-9", 0)]));
        let other = InstanceRef {
            instance_id: "7".into(),
            ..instance()
        };

        let err = detach_disk(&inventory, &other, "disk-9", &config())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound(ref id) if id == "RG1/vmss-a/7"));
    }

    #[tokio::test]
    async fn dry_run_skips_update() {
        let inventory = FakeInventory::new(instance(), vm_with_disks(vec![disk("disk-9", 0)]));
        let config = RemediationConfig {
            dry_run: true,
            ..config()
        };

        detach_disk(&inventory, &instance(), "disk-9", &config)
            .await
            .unwrap();

        assert_eq!(inventory.update_count(), 0);
        assert_eq!(inventory.disk_names(), ["disk-9"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out_as_transient() {
        let mut inventory = FakeInventory::new(instance(), vm_with_disks(vec![disk("disk-9", 0)]));
        inventory.fetch_delay = Some(Duration::from_secs(60));

        let err = detach_disk(&inventory, &instance(), "disk-9", &config())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TransientProvider(_)));
        assert!(err.is_retryable());
        assert_eq!(inventory.update_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_update_times_out_as_transient() {
        let mut inventory = FakeInventory::new(instance(), vm_with_disks(vec![disk("disk-9", 0)]));
        inventory.update_delay = Some(Duration::from_secs(600));
        let config = RemediationConfig {
            call_timeout: Duration::from_secs(5),
            ..config()
        };

        let err = detach_disk(&inventory, &instance(), "disk-9", &config)
            .await
            .unwrap_err();

        assert!(
            matches!(err, Error::TransientProvider(ref msg) if msg == "updating RG1/vmss-a/2 timed out after 5s")
        );
        assert!(err.is_retryable());
        assert_eq!(inventory.update_count(), 0);
        assert_eq!(inventory.disk_names(), ["disk-9"]);
    }
}
