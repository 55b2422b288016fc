// Low-level frame IO for tabula-wire over QUIC streams.
use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use quinn::{ReadExactError, RecvStream, SendStream};
use tabula_wire::{ClientMessage, Frame, FrameHeader};

pub(crate) async fn read_frame_into(
    recv: &mut RecvStream,
    scratch: &mut BytesMut,
    max_frame_bytes: usize,
) -> Result<Option<Frame>> {
    let mut header_bytes = [0u8; FrameHeader::LEN];
    match recv.read_exact(&mut header_bytes).await {
        Ok(()) => {}
        Err(ReadExactError::FinishedEarly(_)) => return Ok(None),
        Err(ReadExactError::ReadError(err)) => return Err(err.into()),
    }
    let header = FrameHeader::decode(Bytes::copy_from_slice(&header_bytes))
        .context("decode frame header")?;
    let length = usize::try_from(header.length).context("frame length")?;

    // The buffer below is sized by the advertised length; enforce the cap
    // before allocating.
    if length > max_frame_bytes {
        anyhow::bail!("frame too large: {length} bytes (cap {max_frame_bytes}); refusing");
    }

    // Reuse the scratch buffer to avoid per-frame allocations.
    scratch.clear();
    scratch.resize(length, 0u8);
    recv.read_exact(&mut scratch[..])
        .await
        .context("read frame payload")?;

    Ok(Some(Frame {
        header,
        payload: scratch.split().freeze(),
    }))
}

pub(crate) async fn write_frame(send: &mut SendStream, frame: &Frame) -> Result<()> {
    let mut header_bytes = [0u8; FrameHeader::LEN];
    frame.header.encode_into(&mut header_bytes);
    send.write_all(&header_bytes)
        .await
        .context("write frame header")?;
    send.write_all(&frame.payload)
        .await
        .context("write frame payload")?;
    Ok(())
}

pub(crate) async fn write_client_message(
    send: &mut SendStream,
    message: &ClientMessage,
) -> Result<()> {
    let frame = message.encode().context("encode control frame")?;
    write_frame(send, &frame).await
}
