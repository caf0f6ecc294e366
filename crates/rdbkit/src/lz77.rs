//! Decompression for the LZ77 variant used by compressed snapshot strings
//! (level-1 FastLZ).
//!
//! The input is a sequence of instructions dispatched on the control byte's
//! top three bits:
//!
//! - `000xxxxx`: literal run. The next `xxxxx + 1` input bytes are copied to
//!   the output verbatim.
//! - `111xxxxx`: long match. The match length is `9 + next_byte`; the back
//!   reference is `(xxxxx << 8 | byte_after_len) + 1` behind the output
//!   cursor.
//! - anything else: short match. The match length is `top3 + 2`; the back
//!   reference offset occupies the next byte alone.
//!
//! A match may extend past the current output cursor. In that case the
//! copy must proceed byte by byte so that bytes written earlier in the same
//! match are available as the source of later ones.

use crate::error::{Result, SnapshotError};

const CORRUPT: SnapshotError = SnapshotError::Malformed("corrupt compressed string content");

/// Decompresses `inp`, which is expected to produce exactly `out_len` bytes.
///
/// The output buffer grows by appending; `out_len` is an untrusted value and
/// is never pre-allocated.
pub(crate) fn decompress(inp: &[u8], out_len: usize) -> Result<Vec<u8>> {
    let mut inp_idx = 0usize;
    let mut out: Vec<u8> = Vec::new();

    while inp_idx < inp.len() {
        let ctrl = inp[inp_idx];
        inp_idx += 1;

        if ctrl < 32 {
            // Literal run of ctrl + 1 bytes.
            let run = ctrl as usize + 1;

            if inp.len() < inp_idx + run {
                return Err(CORRUPT);
            }
            if out_len < out.len() + run {
                return Err(CORRUPT);
            }

            out.extend_from_slice(&inp[inp_idx..inp_idx + run]);
            inp_idx += run;
        } else {
            // Back reference into the output produced so far.
            let mut match_len = (ctrl >> 5) as usize + 2;

            if inp.len() <= inp_idx {
                return Err(CORRUPT);
            }

            if match_len == 9 {
                // Long match: the length continues in the next byte.
                match_len += inp[inp_idx] as usize;
                inp_idx += 1;

                if inp.len() <= inp_idx {
                    return Err(CORRUPT);
                }
            }

            let offset = ((ctrl & 0x1F) as usize) << 8 | inp[inp_idx] as usize;
            inp_idx += 1;

            let Some(back_ref) = out.len().checked_sub(offset + 1) else {
                return Err(CORRUPT);
            };

            if out_len < out.len() + match_len {
                return Err(CORRUPT);
            }

            if back_ref + match_len < out.len() {
                out.extend_from_within(back_ref..back_ref + match_len);
            } else {
                // The match overlaps the output cursor; copy byte by byte so
                // the freshly appended bytes feed the rest of the match.
                for i in 0..match_len {
                    let byte = out[back_ref + i];
                    out.push(byte);
                }
            }
        }
    }

    if out.len() != out_len {
        return Err(CORRUPT);
    }

    Ok(out)
}
