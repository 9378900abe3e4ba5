// gpu/device.rs — Device selection.
//
// Walk platforms in driver order, ask each for devices of the requested
// class, take the first hit. Nothing is created here: a failed selection
// leaves no context, queue or buffer behind because none was ever built.
//
// SELECTION POLICY
// ────────────────
// Which platforms to search and which device classes to accept are policy,
// not hard-coded behaviour:
//
//   class           — the class to look for first (default: GPU).
//   platforms       — FirstOnly searches only the first platform the
//                     driver reports; All walks every platform in order.
//   fallback_class  — a second class to try across the same platforms when
//                     nothing of `class` exists (e.g. accept a software
//                     CPU device rather than fail).
//
// Device availability is assumed stable for the life of the process, so a
// failed selection is not retried.

use std::fmt;

use tracing::{debug, info};

use crate::error::DispatchError;
use crate::gpu::api::{ComputeApi, DeviceClass};

/// Which platforms `select_device` walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformSearch {
    /// Only the first platform reported.
    FirstOnly,
    /// Every platform, in driver order.
    All,
}

/// How a device is chosen for a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub class: DeviceClass,
    pub platforms: PlatformSearch,
    pub fallback_class: Option<DeviceClass>,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        SelectionPolicy {
            class: DeviceClass::Gpu,
            platforms: PlatformSearch::All,
            fallback_class: None,
        }
    }
}

impl SelectionPolicy {
    /// Classes to try, in order.
    fn classes(&self) -> impl Iterator<Item = DeviceClass> {
        std::iter::once(self.class).chain(self.fallback_class.filter(|&c| c != self.class))
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let search = match self.platforms {
            PlatformSearch::FirstOnly => "first platform",
            PlatformSearch::All => "all platforms",
        };
        match self.fallback_class {
            Some(fb) => write!(f, "{} (fallback {fb}) on {search}", self.class),
            None => write!(f, "{} on {search}", self.class),
        }
    }
}

/// Pick the first device satisfying `policy`.
///
/// # Errors
/// `NoDeviceFound` if the API reports no platform, or no searched platform
/// has a device of an accepted class.
pub fn select_device<A: ComputeApi>(
    api: &A,
    policy: &SelectionPolicy,
) -> Result<A::Device, DispatchError> {
    let platforms = api.platforms();
    if platforms.is_empty() {
        return Err(DispatchError::NoDeviceFound("no compute platform available".into()));
    }

    let searched = match policy.platforms {
        PlatformSearch::FirstOnly => &platforms[..1],
        PlatformSearch::All => &platforms[..],
    };

    for class in policy.classes() {
        for platform in searched {
            let name = api.platform_name(platform);
            let mut devices = api.devices(platform, class).into_iter();
            match devices.next() {
                Some(device) => {
                    info!(device = %api.device_info(&device), "selected compute device");
                    return Ok(device);
                }
                None => debug!(platform = %name, %class, "no matching device on platform"),
            }
        }
    }

    Err(DispatchError::NoDeviceFound(format!(
        "no device matching {policy} ({} platform(s) searched)",
        searched.len()
    )))
}
