//! Store key layout
//!
//! Every key is `prefix byte || components`. Addresses are length-prefixed,
//! integers and timestamps are big-endian so lexicographic byte order equals
//! numeric order. Secondary indexes store an empty value; the key itself is
//! the payload.
//!
//! ```text
//! 0x11 | lp(operator)                       -> last validator power (i64)
//! 0x12                                      -> last total power (i64)
//! 0x21 | lp(operator)                       -> Validator
//! 0x22 | lp(cons address)                   -> operator address
//! 0x23 | power (u64 BE) | lp(!operator)     -> ()
//! 0x24 | lp(operator)                       -> ()   whitelist
//! 0x31 | lp(delegator) | lp(validator)      -> Delegation
//! 0x32 | lp(delegator) | lp(validator)      -> UnbondingDelegation
//! 0x33 | lp(validator) | lp(delegator)      -> ()
//! 0x34 | lp(del) | lp(src) | lp(dst)        -> Redelegation
//! 0x35 | lp(src) | lp(del) | lp(dst)        -> ()
//! 0x36 | lp(dst) | lp(del) | lp(src)        -> ()
//! 0x37 | lp(validator) | lp(delegator)      -> ()   delegations by validator
//! 0x38                                      -> last unbonding id (u64)
//! 0x39 | id (u64 BE)                        -> key of the owning record
//! 0x3a | id (u64 BE)                        -> UnbondingType
//! 0x41 | time (u64 BE)                      -> Vec<DvPair>
//! 0x42 | time (u64 BE)                      -> Vec<DvvTriplet>
//! 0x43 | time (u64 BE) | height (u64 BE)    -> Vec<Address>
//! 0x51                                      -> Params
//! 0x61 | lp(pool in) | lp(pool out)         -> DelegationMigration
//! ```

use crate::types::{Address, ConsAddress, Height, Timestamp, UnbondingId};

pub const LAST_VALIDATOR_POWER_KEY: u8 = 0x11;
pub const LAST_TOTAL_POWER_KEY: u8 = 0x12;

pub const VALIDATORS_KEY: u8 = 0x21;
pub const VALIDATORS_BY_CONS_ADDR_KEY: u8 = 0x22;
pub const VALIDATORS_BY_POWER_INDEX_KEY: u8 = 0x23;
pub const WHITELIST_KEY: u8 = 0x24;

pub const DELEGATION_KEY: u8 = 0x31;
pub const UNBONDING_DELEGATION_KEY: u8 = 0x32;
pub const UNBONDING_DELEGATION_BY_VAL_INDEX_KEY: u8 = 0x33;
pub const REDELEGATION_KEY: u8 = 0x34;
pub const REDELEGATION_BY_VAL_SRC_INDEX_KEY: u8 = 0x35;
pub const REDELEGATION_BY_VAL_DST_INDEX_KEY: u8 = 0x36;
pub const DELEGATION_BY_VAL_INDEX_KEY: u8 = 0x37;
pub const UNBONDING_ID_KEY: u8 = 0x38;
pub const UNBONDING_INDEX_KEY: u8 = 0x39;
pub const UNBONDING_TYPE_KEY: u8 = 0x3a;

pub const UNBONDING_QUEUE_KEY: u8 = 0x41;
pub const REDELEGATION_QUEUE_KEY: u8 = 0x42;
pub const VALIDATOR_QUEUE_KEY: u8 = 0x43;

pub const PARAMS_KEY: u8 = 0x51;

pub const DELEGATION_MIGRATION_KEY: u8 = 0x61;

/// `len || bytes`. Components are addresses or denoms, both well under 255
/// bytes; anything longer is cut at 255.
pub fn length_prefixed(bytes: &[u8]) -> Vec<u8> {
    let bytes = &bytes[..bytes.len().min(u8::MAX as usize)];
    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
    out
}

/// Reads one length-prefixed component, returning it and the rest
pub fn split_length_prefixed(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let (&len, rest) = bytes.split_first()?;
    let len = len as usize;
    if rest.len() < len {
        return None;
    }
    Some(rest.split_at(len))
}

fn parse_address(bytes: &[u8]) -> Option<(Address, &[u8])> {
    let (component, rest) = split_length_prefixed(bytes)?;
    Some((Address::from_slice(component)?, rest))
}

fn key(prefix: u8, parts: &[&[u8]]) -> Vec<u8> {
    let mut out = vec![prefix];
    for part in parts {
        out.extend_from_slice(&length_prefixed(part));
    }
    out
}

pub fn last_validator_power_key(operator: &Address) -> Vec<u8> {
    key(LAST_VALIDATOR_POWER_KEY, &[operator.as_bytes()])
}

pub fn validator_key(operator: &Address) -> Vec<u8> {
    key(VALIDATORS_KEY, &[operator.as_bytes()])
}

pub fn validator_by_cons_addr_key(cons: &ConsAddress) -> Vec<u8> {
    key(VALIDATORS_BY_CONS_ADDR_KEY, &[cons.as_bytes()])
}

/// Power index key. Iterating the index in reverse yields validators by
/// descending power, ties broken by ascending operator address (the
/// address is stored bit-inverted).
pub fn validator_by_power_index_key(power: i64, operator: &Address) -> Vec<u8> {
    let power = u64::try_from(power.max(0)).unwrap_or(0);
    let inverted: Vec<u8> = operator.as_bytes().iter().map(|b| !b).collect();

    let mut out = vec![VALIDATORS_BY_POWER_INDEX_KEY];
    out.extend_from_slice(&power.to_be_bytes());
    out.extend_from_slice(&length_prefixed(&inverted));
    out
}

/// Operator address from a power index key
pub fn parse_validator_power_index_key(key: &[u8]) -> Option<(i64, Address)> {
    let rest = key.strip_prefix(&[VALIDATORS_BY_POWER_INDEX_KEY])?;
    if rest.len() < 8 {
        return None;
    }
    let (power_bytes, rest) = rest.split_at(8);
    let power = u64::from_be_bytes(power_bytes.try_into().ok()?);
    let (inverted, _) = split_length_prefixed(rest)?;
    let original: Vec<u8> = inverted.iter().map(|b| !b).collect();
    Some((i64::try_from(power).ok()?, Address::from_slice(&original)?))
}

pub fn whitelist_key(operator: &Address) -> Vec<u8> {
    key(WHITELIST_KEY, &[operator.as_bytes()])
}

pub fn parse_single_address_key(prefix: u8, key: &[u8]) -> Option<Address> {
    let rest = key.strip_prefix(&[prefix])?;
    parse_address(rest).map(|(addr, _)| addr)
}

pub fn delegation_key(delegator: &Address, validator: &Address) -> Vec<u8> {
    key(DELEGATION_KEY, &[delegator.as_bytes(), validator.as_bytes()])
}

pub fn delegations_key(delegator: &Address) -> Vec<u8> {
    key(DELEGATION_KEY, &[delegator.as_bytes()])
}

pub fn delegation_by_val_index_key(validator: &Address, delegator: &Address) -> Vec<u8> {
    key(DELEGATION_BY_VAL_INDEX_KEY, &[validator.as_bytes(), delegator.as_bytes()])
}

pub fn delegations_by_val_prefix(validator: &Address) -> Vec<u8> {
    key(DELEGATION_BY_VAL_INDEX_KEY, &[validator.as_bytes()])
}

pub fn unbonding_delegation_key(delegator: &Address, validator: &Address) -> Vec<u8> {
    key(UNBONDING_DELEGATION_KEY, &[delegator.as_bytes(), validator.as_bytes()])
}

pub fn unbonding_delegations_key(delegator: &Address) -> Vec<u8> {
    key(UNBONDING_DELEGATION_KEY, &[delegator.as_bytes()])
}

pub fn unbonding_delegation_by_val_index_key(validator: &Address, delegator: &Address) -> Vec<u8> {
    key(
        UNBONDING_DELEGATION_BY_VAL_INDEX_KEY,
        &[validator.as_bytes(), delegator.as_bytes()],
    )
}

pub fn unbonding_delegations_by_val_prefix(validator: &Address) -> Vec<u8> {
    key(UNBONDING_DELEGATION_BY_VAL_INDEX_KEY, &[validator.as_bytes()])
}

/// (first, second) addresses of a two-address index key
pub fn parse_address_pair_key(prefix: u8, key: &[u8]) -> Option<(Address, Address)> {
    let rest = key.strip_prefix(&[prefix])?;
    let (first, rest) = parse_address(rest)?;
    let (second, _) = parse_address(rest)?;
    Some((first, second))
}

pub fn redelegation_key(delegator: &Address, src: &Address, dst: &Address) -> Vec<u8> {
    key(
        REDELEGATION_KEY,
        &[delegator.as_bytes(), src.as_bytes(), dst.as_bytes()],
    )
}

pub fn redelegations_key(delegator: &Address) -> Vec<u8> {
    key(REDELEGATION_KEY, &[delegator.as_bytes()])
}

pub fn redelegations_from_src_key(delegator: &Address, src: &Address) -> Vec<u8> {
    key(REDELEGATION_KEY, &[delegator.as_bytes(), src.as_bytes()])
}

pub fn redelegation_by_val_src_index_key(delegator: &Address, src: &Address, dst: &Address) -> Vec<u8> {
    key(
        REDELEGATION_BY_VAL_SRC_INDEX_KEY,
        &[src.as_bytes(), delegator.as_bytes(), dst.as_bytes()],
    )
}

pub fn redelegations_by_val_src_prefix(src: &Address) -> Vec<u8> {
    key(REDELEGATION_BY_VAL_SRC_INDEX_KEY, &[src.as_bytes()])
}

pub fn redelegation_by_val_dst_index_key(delegator: &Address, src: &Address, dst: &Address) -> Vec<u8> {
    key(
        REDELEGATION_BY_VAL_DST_INDEX_KEY,
        &[dst.as_bytes(), delegator.as_bytes(), src.as_bytes()],
    )
}

pub fn redelegations_by_val_dst_prefix(dst: &Address) -> Vec<u8> {
    key(REDELEGATION_BY_VAL_DST_INDEX_KEY, &[dst.as_bytes()])
}

pub fn redelegations_by_del_val_dst_prefix(delegator: &Address, dst: &Address) -> Vec<u8> {
    key(
        REDELEGATION_BY_VAL_DST_INDEX_KEY,
        &[dst.as_bytes(), delegator.as_bytes()],
    )
}

/// Three addresses of a redelegation index key, in key order
pub fn parse_address_triplet_key(prefix: u8, key: &[u8]) -> Option<(Address, Address, Address)> {
    let rest = key.strip_prefix(&[prefix])?;
    let (first, rest) = parse_address(rest)?;
    let (second, rest) = parse_address(rest)?;
    let (third, _) = parse_address(rest)?;
    Some((first, second, third))
}

pub fn unbonding_id_key() -> Vec<u8> {
    vec![UNBONDING_ID_KEY]
}

pub fn unbonding_index_key(id: UnbondingId) -> Vec<u8> {
    let mut out = vec![UNBONDING_INDEX_KEY];
    out.extend_from_slice(&id.to_be_bytes());
    out
}

pub fn unbonding_type_key(id: UnbondingId) -> Vec<u8> {
    let mut out = vec![UNBONDING_TYPE_KEY];
    out.extend_from_slice(&id.to_be_bytes());
    out
}

pub fn unbonding_queue_time_key(time: Timestamp) -> Vec<u8> {
    let mut out = vec![UNBONDING_QUEUE_KEY];
    out.extend_from_slice(&time.to_be_bytes());
    out
}

pub fn redelegation_queue_time_key(time: Timestamp) -> Vec<u8> {
    let mut out = vec![REDELEGATION_QUEUE_KEY];
    out.extend_from_slice(&time.to_be_bytes());
    out
}

pub fn validator_queue_key(time: Timestamp, height: Height) -> Vec<u8> {
    let mut out = vec![VALIDATOR_QUEUE_KEY];
    out.extend_from_slice(&time.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out
}

/// (time, height) of a validator queue key
pub fn parse_validator_queue_key(key: &[u8]) -> Option<(Timestamp, Height)> {
    let rest = key.strip_prefix(&[VALIDATOR_QUEUE_KEY])?;
    if rest.len() != 16 {
        return None;
    }
    let (time, height) = rest.split_at(8);
    Some((
        u64::from_be_bytes(time.try_into().ok()?),
        u64::from_be_bytes(height.try_into().ok()?),
    ))
}

pub fn params_key() -> Vec<u8> {
    vec![PARAMS_KEY]
}

pub fn last_total_power_key() -> Vec<u8> {
    vec![LAST_TOTAL_POWER_KEY]
}

pub fn delegation_migration_key(pool_in: &[u8], pool_out: &[u8]) -> Vec<u8> {
    key(DELEGATION_MIGRATION_KEY, &[pool_in, pool_out])
}
