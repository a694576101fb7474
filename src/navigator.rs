//! Cyclic "next session" within one working directory.

use crate::data::Session;
use crate::error::{CluxError, Result};

/// The sibling after `current_id`, wrapping around.
///
/// `siblings` are the non-archived sessions of one directory in registry
/// order. Returns `Ok(None)` when there is nobody else to switch to.
pub fn next<'a>(current_id: &str, siblings: &'a [Session]) -> Result<Option<&'a Session>> {
    if siblings.len() <= 1 {
        return Ok(None);
    }
    let index = siblings
        .iter()
        .position(|s| s.id == current_id)
        .ok_or(CluxError::NotInList)?;
    Ok(siblings.get((index + 1) % siblings.len()))
}
