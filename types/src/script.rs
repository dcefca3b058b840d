//! The few script-level inspections consensus accounting needs.
//!
//! Script *execution* is owned by the verifier the organizer drives; this
//! module only walks push opcodes, which is enough for signature-operation
//! counting, pay-to-script-hash detection, and the coinbase height commitment.

const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_1: u8 = 0x51;
const OP_16: u8 = 0x60;
const OP_CHECKSIG: u8 = 0xac;
const OP_CHECKSIGVERIFY: u8 = 0xad;
const OP_CHECKMULTISIG: u8 = 0xae;
const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;
const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;

const MULTISIG_DEFAULT_SIGOPS: usize = 20;

/// Counts signature operations in a script.
///
/// With `accurate` set, a multisig preceded by a small-integer push counts as
/// that many operations; otherwise every multisig counts as twenty. Accurate
/// counting applies inside pay-to-script-hash redemptions only.
#[must_use]
pub fn sigop_count(script: &[u8], accurate: bool) -> usize {
    let mut sigops = 0;
    let mut previous = None;
    let mut index = 0;

    while index < script.len() {
        let opcode = script[index];
        index += 1;

        match opcode {
            1..=0x4b => index += usize::from(opcode),
            OP_PUSHDATA1 => {
                let length = script.get(index).copied().unwrap_or(0);
                index += 1 + usize::from(length);
            }
            OP_PUSHDATA2 => {
                let length = script
                    .get(index..index + 2)
                    .map_or(0, |bytes| u16::from_le_bytes([bytes[0], bytes[1]]));
                index += 2 + usize::from(length);
            }
            OP_PUSHDATA4 => {
                let length = script
                    .get(index..index + 4)
                    .map_or(0, |bytes| {
                        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
                    });
                index += 4 + length as usize;
            }
            OP_CHECKSIG | OP_CHECKSIGVERIFY => sigops += 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                sigops += match previous {
                    Some(op) if accurate && (OP_1..=OP_16).contains(&op) => {
                        usize::from(op - OP_1 + 1)
                    }
                    _ => MULTISIG_DEFAULT_SIGOPS,
                }
            }
            _ => {}
        }

        previous = Some(opcode);
    }

    sigops
}

/// Whether an output script is the canonical pay-to-script-hash pattern.
#[must_use]
pub fn is_pay_to_script_hash(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

/// The final data push of an input script, which pay-to-script-hash
/// redemption interprets as the embedded script.
#[must_use]
pub fn embedded_script(script_sig: &[u8]) -> Option<Vec<u8>> {
    let mut last_push = None;
    let mut index = 0;

    while index < script_sig.len() {
        let opcode = script_sig[index];
        index += 1;

        let length = match opcode {
            0 => 0,
            1..=0x4b => usize::from(opcode),
            OP_PUSHDATA1 => {
                let length = usize::from(*script_sig.get(index)?);
                index += 1;
                length
            }
            OP_PUSHDATA2 => {
                let bytes = script_sig.get(index..index + 2)?;
                index += 2;
                usize::from(u16::from_le_bytes([bytes[0], bytes[1]]))
            }
            OP_PUSHDATA4 => {
                let bytes = script_sig.get(index..index + 4)?;
                index += 4;
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
            }
            // Anything but a push disqualifies the script from redemption.
            _ => return None,
        };

        last_push = Some(script_sig.get(index..index + length)?.to_vec());
        index += length;
    }

    last_push
}

/// The minimally-encoded script number for a block height, as committed to by
/// coinbase input scripts: a length byte followed by little-endian digits,
/// with a padding byte when the top bit would read as a sign.
#[must_use]
pub fn script_number(height: u32) -> Vec<u8> {
    if height == 0 {
        return vec![0];
    }

    let mut digits = height.to_le_bytes().to_vec();

    while digits.len() > 1 && digits[digits.len() - 1] == 0 {
        digits.pop();
    }

    if digits[digits.len() - 1] & 0x80 != 0 {
        digits.push(0);
    }

    let mut push = vec![digits.len() as u8];
    push.append(&mut digits);
    push
}
