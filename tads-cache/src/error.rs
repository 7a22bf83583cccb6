use {
    crate::{ConfigError, ObjNum, SwapError},
    std::io,
    thiserror::Error,
};

/// Cache result.
pub type Result<T> =
    std::result::Result<T, Error>;

/// Cache error.
///
/// Resource exhaustion and caller mistakes are reported the same way.
/// Every failing operation leaves the cache consistent:
/// anything it set up before failing has been given back.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum Error
{
    #[error("Out of memory")]
    OutOfMemory,

    #[error("Object of {0} bytes does not fit in a heap chunk")]
    ObjectTooBig(usize),

    #[error("No more object headers")]
    NoMoreHeaders,

    #[error("Client object table is full")]
    ClientTableFull,

    #[error("Client object number {0} is already in use")]
    ClientNumberInUse(ObjNum),

    #[error("Invalid object number {0}")]
    InvalidObject(ObjNum),

    #[error("Object {0} is not locked")]
    NotLocked(ObjNum),

    #[error("Cannot free object {0} while it is locked")]
    LockedObjectFreed(ObjNum),

    #[error("Cannot move object {0} because it has multiple lock holders")]
    ReallocMultipleLocks(ObjNum),

    #[error("Object {0} must be reloaded but has no load source")]
    LoadSourceMissing(ObjNum),

    #[error("Cannot load object {0}: {1}")]
    Load(ObjNum, #[source] io::Error),

    #[error("{0}")]
    Swap(#[from] SwapError),

    #[error("{0}")]
    Config(#[from] ConfigError),
}
