use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not mount bucket {_0}")]
    Mount(#[error(not(source))] String),
    #[display("{_0} failed")]
    Command(#[error(not(source))] String),
    #[display("could not save mount state")]
    State,
}
