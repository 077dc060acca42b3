use thiserror::Error;

use crate::connector::ConnectorError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Db(#[from] leadscout_db::DbError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("stage output for {stage} could not be (de)serialized: {source}")]
    StageCodec {
        stage: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("store error: {0}")]
    Store(String),
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Db(leadscout_db::DbError::Sqlx(err))
    }
}
