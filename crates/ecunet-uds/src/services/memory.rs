//! ReadMemoryByAddress (0x23)

use tracing::warn;

use super::{Outcome, ServiceContext, ServiceResult};
use crate::frame::Frame;
use crate::uds::{positive_response, read_be, service_id, NegativeResponseCode};

/// Address and size decoded from an address-and-length format identifier
pub(crate) fn parse_address_and_size(alfid: u8, rest: &[u8]) -> Option<(u64, u64, usize)> {
    let address_len = (alfid & 0x0F) as usize;
    let size_len = (alfid >> 4) as usize;
    let (address, rest) = read_be(rest, address_len)?;
    let (size, _) = read_be(rest, size_len)?;
    Some((address, size, address_len + size_len))
}

pub fn read_memory_by_address(ctx: &ServiceContext, request: &Frame) -> ServiceResult {
    let alfid = request.data[1];
    let (address, size, consumed) = parse_address_and_size(alfid, &request.data[2..])
        .ok_or(NegativeResponseCode::IncorrectMessageLengthOrFormat)?;

    if request.data.len() != 2 + consumed
        || size == 0
        || !ctx.backing.available_address(address)
        || !ctx.backing.available_memory(address, size)
    {
        return Err(NegativeResponseCode::IncorrectMessageLengthOrFormat);
    }

    let bytes = ctx.backing.read_from_address(address, size).map_err(|e| {
        warn!(
            node = %ctx.node,
            address = format!("0x{:X}", address),
            size,
            error = %e,
            "Memory read failed"
        );
        NegativeResponseCode::RequestOutOfRange
    })?;

    Ok(Outcome::Reply(positive_response(
        service_id::READ_MEMORY_BY_ADDRESS,
        &bytes,
    )))
}
