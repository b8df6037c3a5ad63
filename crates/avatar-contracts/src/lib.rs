pub mod artifacts;
pub mod concept;
pub mod events;
pub mod pricing;
pub mod request;
pub mod runs;
