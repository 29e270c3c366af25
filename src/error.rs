use thiserror::Error;

use crate::address::RedisUri;

#[derive(Debug, Error)]
pub enum Error {
    #[error("master_name parameter is not defined")]
    MasterNameRequired,

    #[error("at least one sentinel address should be defined")]
    NoSentinelAddresses,

    #[error("invalid redis URI '{0}'")]
    InvalidUri(String),

    #[error("unable to connect to Redis sentinel servers: {0}")]
    SentinelsUnreachable(String),

    #[error(
        "master node is undefined, SENTINEL GET-MASTER-ADDR-BY-NAME command returned empty result"
    )]
    MasterUndefined,

    #[error(
        "SENTINEL SENTINELS command returned empty result, \
         set check_sentinels_list = false to avoid this check"
    )]
    SentinelsListEmpty,

    #[error(
        "SENTINEL SENTINELS command returned less than 2 nodes, at least two sentinels \
         should be defined in Redis configuration, \
         set check_sentinels_list = false to avoid this check"
    )]
    SentinelsListTooSmall,

    #[error("can't connect to servers ({0})")]
    NoMasterDiscovered(String),

    #[error("connection to {0} failed: {1}")]
    Connection(RedisUri, String),

    #[error("authentication required by {0}")]
    AuthRequired(RedisUri),

    #[error("error reply: {0}")]
    Reply(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unable to resolve hostname {0}")]
    Resolution(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("pool rejected {0}: {1}")]
    PoolRejected(RedisUri, String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
