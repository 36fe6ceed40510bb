use super::error::ValueDecodeError;
use super::prim::Prim;

const NAMED_ENTRYPOINT: u8 = 255;

const RESERVED_ENTRYPOINTS: [&str; 10] = [
    "default",
    "root",
    "do",
    "set_delegate",
    "remove_delegate",
    "deposit",
    "stake",
    "unstake",
    "finalize_unstake",
    "set_delegate_parameters",
];

/// Transaction parameters: the called entrypoint and its argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
    pub entrypoint: String,
    pub value: Prim,
}

impl Parameters {
    pub fn from_binary(buf: &[u8]) -> Result<Self, ValueDecodeError> {
        let (&tag, rest) = buf
            .split_first()
            .ok_or(ValueDecodeError::Truncated { offset: 0, needed: 1 })?;
        let (entrypoint, rest) = if tag == NAMED_ENTRYPOINT {
            let (&len, rest) = rest
                .split_first()
                .ok_or(ValueDecodeError::Truncated { offset: 1, needed: 1 })?;
            let len = len as usize;
            if rest.len() < len {
                return Err(ValueDecodeError::Truncated {
                    offset: 2,
                    needed: len - rest.len(),
                });
            }
            let name = String::from_utf8(rest[..len].to_vec())?;
            (name, &rest[len..])
        } else {
            let name = RESERVED_ENTRYPOINTS
                .get(tag as usize)
                .ok_or(ValueDecodeError::UnknownEntrypointTag(tag))?;
            (name.to_string(), rest)
        };
        let offset = buf.len() - rest.len();
        if rest.len() < 4 {
            return Err(ValueDecodeError::Truncated {
                offset,
                needed: 4 - rest.len(),
            });
        }
        let size = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let body = &rest[4..];
        if body.len() < size {
            return Err(ValueDecodeError::Truncated {
                offset: offset + 4,
                needed: size - body.len(),
            });
        }
        let value = Prim::from_binary(&body[..size])?;
        Ok(Self { entrypoint, value })
    }

    pub fn from_hex(text: &str) -> Result<Self, ValueDecodeError> {
        Self::from_binary(&hex::decode(text)?)
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match RESERVED_ENTRYPOINTS.iter().position(|e| *e == self.entrypoint) {
            Some(tag) => out.push(tag as u8),
            None => {
                out.push(NAMED_ENTRYPOINT);
                out.push(self.entrypoint.len() as u8);
                out.extend_from_slice(self.entrypoint.as_bytes());
            }
        }
        let value = self.value.to_binary();
        out.extend_from_slice(&(value.len() as u32).to_be_bytes());
        out.extend_from_slice(&value);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::micheline::OpCode;

    #[test]
    fn test_named_entrypoint() {
        // ff 08 "transfer" 00000002 0001
        let params = Parameters::from_hex("ff087472616e73666572000000020001").unwrap();
        assert_eq!(params.entrypoint, "transfer");
        assert_eq!(params.value, Prim::int(1));
    }

    #[test]
    fn test_reserved_entrypoint() {
        let params = Parameters {
            entrypoint: "default".into(),
            value: Prim::app(OpCode::D_UNIT, vec![]),
        };
        let buf = params.to_binary();
        assert_eq!(buf[0], 0);
        assert_eq!(Parameters::from_binary(&buf).unwrap(), params);
    }

    #[test]
    fn test_truncated_body() {
        let err = Parameters::from_hex("00000000050001").unwrap_err();
        assert!(matches!(err, ValueDecodeError::Truncated { offset: 5, needed: 3 }));
        assert!(matches!(
            Parameters::from_hex("0c00000000").unwrap_err(),
            ValueDecodeError::UnknownEntrypointTag(12)
        ));
    }
}
