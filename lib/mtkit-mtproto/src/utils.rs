// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::mtp::DeserializeError;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Checks a message buffer for common errors
pub(crate) fn check_message_buffer(message: &[u8]) -> Result<(), DeserializeError> {
    if message.len() == 4 {
        // Probably a negative HTTP error code
        let mut code = [0; 4];
        code.copy_from_slice(message);
        Err(DeserializeError::TransportError {
            code: i32::from_le_bytes(code),
        })
    } else if message.len() < 20 {
        Err(DeserializeError::MessageBufferTooSmall)
    } else {
        Ok(())
    }
}

/// Time elapsed since the Unix epoch according to the local clock.
///
/// A clock set before 1970 is treated as being exactly at the epoch.
pub(crate) fn unix_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}
