//! Startup: locate the module and mount point, then bring a bridge up.
//!
//! A designated script element names both through `data-binary` and
//! `data-mount`. Any missing piece aborts startup before the module is
//! fetched.

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::document::Document;
use crate::error::{BridgeError, Result};
use crate::guest::ModuleLoader;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::rc::Rc;
use tracing::info;

/// Attribute naming the module binary
pub const ATTR_BINARY: &str = "data-binary";

/// Attribute naming the mount element id
pub const ATTR_MOUNT: &str = "data-mount";

/// What the bootstrap script element declares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptAttributes {
    /// Location of the module binary
    pub binary: PathBuf,
    /// Id of the mount element
    pub mount: String,
}

impl ScriptAttributes {
    /// Read and check the attributes of the element whose id is `script_id`
    pub fn discover(document: &dyn Document, script_id: &str) -> Result<Self> {
        let script = document.element_by_id(script_id).ok_or_else(|| {
            BridgeError::BootstrapConfig(format!("Script element `#{}` not found.", script_id))
        })?;

        let attributes = document.attributes(script);
        let lookup = |name: &str| {
            attributes
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| {
                    BridgeError::BootstrapConfig(format!(
                        "Script attribute `{}` is not specified.",
                        name
                    ))
                })
        };

        let binary = lookup(ATTR_BINARY)?;
        let mount = lookup(ATTR_MOUNT)?;

        if document.element_by_id(&mount).is_none() {
            return Err(BridgeError::BootstrapConfig(format!(
                "Mount element `#{}` does not exist.",
                mount
            )));
        }

        Ok(Self {
            binary: PathBuf::from(binary),
            mount,
        })
    }
}

/// Hex SHA-256 of a module binary
pub fn module_digest(binary: &[u8]) -> String {
    hex::encode(Sha256::digest(binary))
}

/// Discover, fetch, and instantiate the module, then run its deferred callbacks.
///
/// The returned bridge is fully initialized.
pub async fn load(
    config: BridgeConfig,
    document: Rc<dyn Document>,
    loader: &dyn ModuleLoader,
) -> Result<Bridge> {
    config.validate()?;
    let script = ScriptAttributes::discover(document.as_ref(), &config.script_id)?;

    let binary = tokio::fs::read(&script.binary).await?;
    info!(
        path = %script.binary.display(),
        bytes = binary.len(),
        sha256 = %module_digest(&binary),
        "Loaded module binary"
    );

    let bridge = Bridge::new(config, document, &script.mount)?;
    bridge.instantiate(loader, &binary)?;

    info!(session = %bridge.session_id(), mount = %script.mount, "Bridge ready");
    Ok(bridge)
}
