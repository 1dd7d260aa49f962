use bytes::Bytes;
use tokio::time::Duration;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Set `key` to hold `value`. If key already holds a value, it is overwritten and any previous
/// time to live is discarded.
///
/// Ref: <https://redis.io/docs/latest/commands/set/>
#[derive(Debug, PartialEq)]
pub struct Set {
    pub key: Bytes,
    pub value: Bytes,
    pub ttl: Option<Ttl>,
}

#[derive(Debug, PartialEq)]
pub enum Ttl {
    Ex(u64),
    Px(u64),
}

impl Ttl {
    pub fn duration(&self) -> Duration {
        match self {
            Ttl::Ex(seconds) => Duration::from_secs(*seconds),
            Ttl::Px(millis) => Duration::from_millis(*millis),
        }
    }
}

impl Set {
    pub const USAGE: &'static str = "SET key value [EX seconds | PX milliseconds]";
}

impl Executable for Set {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        let mut store = store.lock();

        match self.ttl {
            Some(ttl) => store.set_with_ttl(self.key, self.value, ttl.duration()),
            None => store.set(self.key, self.value),
        }

        Ok(Frame::Simple("OK".to_string()))
    }
}

impl TryFrom<&mut CommandParser> for Set {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let value = parser.next_bytes()?;

        let mut ttl = None;

        while parser.has_remaining() {
            let option = parser
                .next_string()
                .map_err(|_| CommandParserError::Syntax)?;

            match option.to_uppercase().as_str() {
                "EX" if ttl.is_none() => ttl = Some(Ttl::Ex(next_expire_time(parser)?)),
                "PX" if ttl.is_none() => ttl = Some(Ttl::Px(next_expire_time(parser)?)),
                _ => return Err(CommandParserError::Syntax),
            }
        }

        Ok(Self { key, value, ttl })
    }
}

fn next_expire_time(parser: &mut CommandParser) -> Result<u64, CommandParserError> {
    let time = match parser.next_integer() {
        Ok(time) => time,
        Err(CommandParserError::EndOfStream) => return Err(CommandParserError::Syntax),
        Err(err) => return Err(err),
    };

    if time <= 0 {
        return Err(CommandParserError::InvalidExpireTime {
            command: "set".to_string(),
        });
    }

    Ok(time as u64)
}
