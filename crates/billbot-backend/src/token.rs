//! Request token shared with the billing backend.
//!
//! The backend expects `md5(HH + "SnabToken" + user_id)` where `HH` is the
//! current local hour. There is no secret involved; the scheme is kept only
//! for compatibility with the server.

use chrono::{Local, Timelike};
use md5::{Digest, Md5};

use crate::types::UserId;

const TOKEN_SALT: &str = "SnabToken";

/// Token for the given hour of day and requester
pub fn token_for_hour(hour: u32, user_id: UserId) -> String {
    let input = format!("{:02}{}{}", hour, TOKEN_SALT, user_id);
    format!("{:x}", Md5::digest(input.as_bytes()))
}

/// Token for the requester using the current local hour
pub fn generate_token(user_id: UserId) -> String {
    token_for_hour(Local::now().hour(), user_id)
}
