//! Scatter/gather frame writing.
//!
//! A frame goes out as a list of segments (stream buffer, header, one or
//! two payload parts) written with `write_vectored`. Short writes are not
//! errors: the remaining segments are rebuilt and written again until
//! everything is flushed or the socket fails.

use std::io::IoSlice;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{PkgError, Result};

/// Write every segment in order, retrying partial writes.
///
/// Returns the total number of bytes written.
pub(crate) async fn write_segments<W>(writer: &mut W, segments: &[&[u8]]) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = segments.iter().map(|s| s.len()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = remaining_slices(segments, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(PkgError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(total_size)
}

/// Build IoSlice array for the data left after `skip_bytes` were written.
fn remaining_slices<'a>(segments: &[&'a [u8]], skip_bytes: usize) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(segments.len());
    let mut skipped = 0;

    for segment in segments {
        let start = skipped;
        let end = skipped + segment.len();

        if skip_bytes < end && !segment.is_empty() {
            let start_in_segment = skip_bytes.saturating_sub(start);
            slices.push(IoSlice::new(&segment[start_in_segment..]));
        }
        skipped = end;
    }

    slices
}
