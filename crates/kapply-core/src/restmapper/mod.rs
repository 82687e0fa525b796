//! The REST mapper reset capability.
//!
//! After applying a CRD, later tasks need to discover the new CR types it
//! introduced. The real RESTMapper/discovery cache is an external
//! collaborator; the core only needs a narrow capability to invalidate it
//! rather than reaching through reflection.
pub trait RestMapper: Send + Sync {
    /// Invalidate any cached type discovery so later tasks see types
    /// introduced by CRDs applied earlier in this run.
    fn reset_types(&self);
}

/// A `RestMapper` that does nothing, usable where no real type cache exists
/// (e.g. most tests).
pub struct NoopRestMapper;

impl RestMapper for NoopRestMapper {
    fn reset_types(&self) {}
}
