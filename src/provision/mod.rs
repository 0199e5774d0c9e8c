//! Provisioning of remote resources.
//!
//! This module ensures that every resource a deployment depends on exists
//! on the control plane:
//! - Storage namespaces declared in the worker configuration
//! - The request gateway, with a scoped credential when it is created

mod control_plane;
mod not_found;
mod pipeline;

#[cfg(test)]
pub(crate) mod testing;

pub use control_plane::{
    ControlPlane, CredentialRequest, IssuedCredential, ResourceDescriptor, ResourceKind,
    ResourceSpec, CREDENTIAL_VALIDITY_DAYS,
};
pub use not_found::{
    AlreadyExistsMatcher, AlreadyExistsPredicate, NotFoundMatcher, NotFoundPredicate,
};
pub use pipeline::{
    ProvisionOutcome, ProvisionPlan, ProvisionReport, ProvisioningPipeline, ResourceReport,
    GATEWAY_URL_BASE, MAX_GATEWAY_NAME_LEN,
};
