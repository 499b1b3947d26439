//! AndX chain walking (spec §4.3): a single SMB1 message can carry a
//! sequence of logically-chained commands, each identified by the
//! previous block's `AndXCommand`/`AndXOffset` parameter words.

use crate::error::{Error, Result};

/// No further command is chained; terminates an AndX chain.
pub const ANDX_NO_FURTHER_COMMAND: u8 = 0xFF;

/// One link of an AndX chain as seen while walking a request or reply.
#[derive(Debug, Clone, Copy)]
pub struct AndXLink {
    /// Absolute offset (from the start of the SMB message, i.e. the
    /// header's `Signature` byte) of this block's word count byte.
    pub block_offset: usize,
    pub command: u8,
}

/// Walks an AndX chain starting at `first_block_offset`, reading each
/// block's command byte and next-offset word via `read_command` and
/// `read_next_offset` callbacks so this module stays agnostic of the
/// exact header/parameter layout.
///
/// Enforces the strictly-increasing offset invariant (spec §4.3, §8):
/// a malformed or looping chain is rejected rather than followed
/// forever.
pub fn walk_chain<F, G>(
    first_block_offset: usize,
    message_len: usize,
    mut read_command: F,
    mut read_next_offset: G,
) -> Result<Vec<AndXLink>>
where
    F: FnMut(usize) -> Result<u8>,
    G: FnMut(usize) -> Result<u16>,
{
    let mut links = Vec::new();
    let mut offset = first_block_offset;
    let mut command = read_command(offset)?;

    loop {
        links.push(AndXLink {
            block_offset: offset,
            command,
        });

        if command == ANDX_NO_FURTHER_COMMAND {
            break;
        }

        let next_offset = read_next_offset(offset)? as usize;
        if next_offset <= offset || next_offset >= message_len {
            return Err(Error::Malformed(format!(
                "AndX chain offset did not strictly increase: {offset} -> {next_offset}"
            )));
        }

        let next_command = read_command(next_offset)?;
        offset = next_offset;
        command = next_command;
    }

    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_block_chain_terminates_immediately() {
        let links = walk_chain(
            32,
            1024,
            |off| if off == 32 { Ok(ANDX_NO_FURTHER_COMMAND) } else { panic!() },
            |_| panic!("should not be called for a terminal block"),
        )
        .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].command, ANDX_NO_FURTHER_COMMAND);
    }

    #[test]
    fn two_block_chain_walks_in_order() {
        // Block at 32 chains to block at 80, which terminates.
        let commands = [(32usize, 0x75u8), (80usize, ANDX_NO_FURTHER_COMMAND)];
        let links = walk_chain(
            32,
            1024,
            |off| {
                commands
                    .iter()
                    .find(|(o, _)| *o == off)
                    .map(|(_, c)| *c)
                    .ok_or_else(|| Error::Malformed("unexpected offset".into()))
            },
            |off| if off == 32 { Ok(80) } else { panic!() },
        )
        .unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].command, 0x75);
        assert_eq!(links[1].command, ANDX_NO_FURTHER_COMMAND);
    }

    #[test]
    fn non_increasing_offset_is_rejected() {
        let err = walk_chain(
            32,
            1024,
            |_| Ok(0x75),
            |_| Ok(32), // loops back to itself
        );
        assert!(matches!(err, Err(Error::Malformed(_))));
    }

    #[test]
    fn offset_past_message_end_is_rejected() {
        let err = walk_chain(32, 100, |_| Ok(0x75), |_| Ok(200));
        assert!(matches!(err, Err(Error::Malformed(_))));
    }
}
