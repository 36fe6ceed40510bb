//! Base58check rendering of binary account addresses.

const TZ1_PREFIX: [u8; 3] = [6, 161, 159];
const TZ2_PREFIX: [u8; 3] = [6, 161, 161];
const TZ3_PREFIX: [u8; 3] = [6, 161, 164];
const TZ4_PREFIX: [u8; 3] = [6, 161, 166];
const KT1_PREFIX: [u8; 3] = [2, 90, 121];

const HASH_LEN: usize = 20;

fn implicit_prefix(curve: u8) -> Option<&'static [u8; 3]> {
    match curve {
        0 => Some(&TZ1_PREFIX),
        1 => Some(&TZ2_PREFIX),
        2 => Some(&TZ3_PREFIX),
        3 => Some(&TZ4_PREFIX),
        _ => None,
    }
}

fn encode(prefix: &[u8], hash: &[u8]) -> String {
    let mut payload = Vec::with_capacity(prefix.len() + hash.len());
    payload.extend_from_slice(prefix);
    payload.extend_from_slice(hash);
    bs58::encode(payload).with_check().into_string()
}

/// Renders a 22-byte address or a 21-byte key hash. Returns `None` for
/// unknown layouts so callers can keep the raw bytes.
pub fn encode_address(buf: &[u8]) -> Option<String> {
    match buf.len() {
        22 => match buf[0] {
            0 => implicit_prefix(buf[1]).map(|p| encode(p, &buf[2..])),
            1 if buf[21] == 0 => Some(encode(&KT1_PREFIX, &buf[1..1 + HASH_LEN])),
            _ => None,
        },
        21 => implicit_prefix(buf[0]).map(|p| encode(p, &buf[1..])),
        // contract with entrypoint suffix
        n if n > 22 => {
            let base = encode_address(&buf[..22])?;
            let entrypoint = std::str::from_utf8(&buf[22..]).ok()?;
            Some(format!("{}%{}", base, entrypoint))
        }
        _ => None,
    }
}

/// Parses a base58 address back into its 22-byte binary layout.
pub fn decode_address(text: &str) -> Option<Vec<u8>> {
    let raw = bs58::decode(text).with_check(None).into_vec().ok()?;
    if raw.len() != 3 + HASH_LEN {
        return None;
    }
    let (prefix, hash) = raw.split_at(3);
    let mut out = Vec::with_capacity(22);
    if prefix == KT1_PREFIX {
        out.push(1);
        out.extend_from_slice(hash);
        out.push(0);
        return Some(out);
    }
    let curve = (0u8..4).find(|c| implicit_prefix(*c).map(|p| p.as_slice()) == Some(prefix))?;
    out.push(0);
    out.push(curve);
    out.extend_from_slice(hash);
    Some(out)
}
