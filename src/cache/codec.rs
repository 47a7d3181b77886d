//! Payload codecs.
//!
//! The cache renders registry snapshots through a [`PayloadCodec`]. JSON is
//! built in; other encodings are left to external collaborators and report
//! [`RegistryError::UnsupportedEncoding`].

use crate::cache::key::{ApiVersion, Encoding};
use crate::core::error::{RegistryError, RegistryResult};
use crate::model::{Application, Applications};
use serde::Serialize;

/// Renders registry snapshots into payload strings.
pub trait PayloadCodec: Send + Sync {
    fn encode_applications(
        &self,
        apps: &Applications,
        encoding: Encoding,
        version: ApiVersion,
    ) -> RegistryResult<String>;

    fn encode_application(
        &self,
        app: &Application,
        encoding: Encoding,
        version: ApiVersion,
    ) -> RegistryResult<String>;
}

/// serde_json codec.
///
/// V1 renders the bare object; V2 wraps it in a named envelope
/// (`{"applications": ...}` or `{"application": ...}`).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

#[derive(Serialize)]
struct ApplicationsEnvelope<'a> {
    applications: &'a Applications,
}

#[derive(Serialize)]
struct ApplicationEnvelope<'a> {
    application: &'a Application,
}

impl JsonCodec {
    fn check(encoding: Encoding) -> RegistryResult<()> {
        match encoding {
            Encoding::Json => Ok(()),
            other => Err(RegistryError::UnsupportedEncoding { encoding: other }),
        }
    }
}

impl PayloadCodec for JsonCodec {
    fn encode_applications(
        &self,
        apps: &Applications,
        encoding: Encoding,
        version: ApiVersion,
    ) -> RegistryResult<String> {
        Self::check(encoding)?;
        let payload = match version {
            ApiVersion::V1 => serde_json::to_string(apps)?,
            ApiVersion::V2 => serde_json::to_string(&ApplicationsEnvelope { applications: apps })?,
        };
        Ok(payload)
    }

    fn encode_application(
        &self,
        app: &Application,
        encoding: Encoding,
        version: ApiVersion,
    ) -> RegistryResult<String> {
        Self::check(encoding)?;
        let payload = match version {
            ApiVersion::V1 => serde_json::to_string(app)?,
            ApiVersion::V2 => serde_json::to_string(&ApplicationEnvelope { application: app })?,
        };
        Ok(payload)
    }
}
