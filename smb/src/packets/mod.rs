//! Wire-format types shared by the framer, dispatcher, and session
//! layers.

pub mod binrw_util;
pub mod guid;
pub mod smb1;
