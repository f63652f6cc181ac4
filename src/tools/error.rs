/// Generic transfer error
#[derive(Debug)]
pub struct FerryError(pub std::io::Error);

///
pub type Result<T> = std::result::Result<T, FerryError>;

impl FerryError {
    /// Return a new transfer error with a message
    pub fn new<E>(msg: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>> + std::fmt::Debug,
    {
        log::error!("{:?}", msg);
        FerryError(std::io::Error::new(std::io::ErrorKind::Other, msg))
    }

    /// Return a new transfer error
    pub fn new_kind<E>(kind: std::io::ErrorKind, msg: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>> + std::fmt::Debug,
    {
        log::error!("{:?}", msg);
        FerryError(std::io::Error::new(kind, msg))
    }
}

impl From<std::io::Error> for FerryError {
    fn from(err: std::io::Error) -> Self {
        log::error!("{:?}", err);
        FerryError(err)
    }
}
