use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] dynamo_wire::WireError),

    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    #[error("server returned an error: {0}")]
    Server(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
