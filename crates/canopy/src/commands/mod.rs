/// `canopy apply`.
pub mod apply;
/// `canopy import`.
pub mod import;
/// `canopy init`.
pub mod init;
/// `canopy ls`.
pub mod list;
/// `canopy plan`.
pub mod plan;
/// `canopy repo get` and `canopy repo ls`.
pub mod repo;
/// `canopy status`.
pub mod status;
