//! ABI encoding of the Safe `setup` call used as proxy initializer.
//!
//! setup(address[] _owners, uint256 _threshold, address to, bytes data,
//!       address fallbackHandler, address paymentToken, uint256 payment,
//!       address paymentReceiver)
//!
//! Only owners and threshold vary; `to`, `paymentToken` and
//! `paymentReceiver` are zero, `data` is empty, `payment` is 0.

use crate::address::Address;
use crate::wallet::WalletConfig;

/// keccak256("setup(address[],uint256,address,bytes,address,address,uint256,address)")[..4]
pub const SETUP_SELECTOR: [u8; 4] = [0xb6, 0x3e, 0x80, 0x0d];

const WORD: usize = 32;
const HEAD_WORDS: usize = 8;

/// Encodes the initializer calldata for `config`.
///
/// Layout: selector, 8 head words, then the owners array tail
/// (length + one word per owner) and the empty `data` tail (length 0).
pub fn encode_setup(config: &WalletConfig, fallback_handler: &Address) -> Vec<u8> {
    let owners = config.owners();
    let owners_offset = HEAD_WORDS * WORD;
    let data_offset = owners_offset + WORD * (1 + owners.len());

    let mut out = Vec::with_capacity(4 + WORD * (HEAD_WORDS + owners.len() + 2));
    out.extend_from_slice(&SETUP_SELECTOR);

    push_uint(&mut out, owners_offset as u64);
    push_uint(&mut out, config.threshold());
    push_address(&mut out, &Address::ZERO); // to
    push_uint(&mut out, data_offset as u64);
    push_address(&mut out, fallback_handler);
    push_address(&mut out, &Address::ZERO); // paymentToken
    push_uint(&mut out, 0); // payment
    push_address(&mut out, &Address::ZERO); // paymentReceiver

    push_uint(&mut out, owners.len() as u64);
    for owner in owners {
        push_address(&mut out, owner);
    }

    push_uint(&mut out, 0); // data.length
    out
}

fn push_uint(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&[0u8; 24]);
    out.extend_from_slice(&value.to_be_bytes());
}

fn push_address(out: &mut Vec<u8>, address: &Address) {
    out.extend_from_slice(&[0u8; 12]);
    out.extend_from_slice(address.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keccak256;
    use crate::deployment::DeploymentConstants;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_selector() {
        let sig = b"setup(address[],uint256,address,bytes,address,address,uint256,address)";
        assert_eq!(&keccak256(sig)[..4], &SETUP_SELECTOR);
    }

    #[test]
    fn test_single_owner_layout() {
        let config = WalletConfig::parse("0xB5856d4598c919834913b8656ebc15a64d3C7836", 1).unwrap();
        let encoded = encode_setup(&config, &DeploymentConstants::default().fallback_handler);

        let expected = concat!(
            "b63e800d",
            "0000000000000000000000000000000000000000000000000000000000000100",
            "0000000000000000000000000000000000000000000000000000000000000001",
            "0000000000000000000000000000000000000000000000000000000000000000",
            "0000000000000000000000000000000000000000000000000000000000000140",
            "000000000000000000000000f48f2b2d2a534e402487b3ee7c18c33aec0fe5e4",
            "0000000000000000000000000000000000000000000000000000000000000000",
            "0000000000000000000000000000000000000000000000000000000000000000",
            "0000000000000000000000000000000000000000000000000000000000000000",
            "0000000000000000000000000000000000000000000000000000000000000001",
            "000000000000000000000000b5856d4598c919834913b8656ebc15a64d3c7836",
            "0000000000000000000000000000000000000000000000000000000000000000",
        );
        assert_eq!(hex::encode(&encoded), expected);
        assert_eq!(encoded.len(), 356);
    }

    #[test]
    fn test_data_offset_tracks_owner_count() {
        let config = WalletConfig::parse(
            "0xB5856d4598c919834913b8656ebc15a64d3C7836,\
             0x1234567890123456789012345678901234567890,\
             0xabcdefabcdefabcdefabcdefabcdefabcdefabcd",
            2,
        )
        .unwrap();
        let encoded = encode_setup(&config, &Address::ZERO);
        assert_eq!(encoded.len(), 4 + 32 * 13);
        // data offset word: 0x100 + 32 * (1 + 3) = 0x180
        assert_eq!(&encoded[4 + 3 * 32 + 30..4 + 4 * 32], &[0x01, 0x80]);
    }
}
