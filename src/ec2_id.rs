//! EC2-style identifier codec.
//!
//! EC2 ids are the integer mapping ids rendered as `{prefix}-{hex:08}`,
//! e.g. instance 10 is `i-0000000a` and volume 255 is `vol-000000ff`.

use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// The maximum value a signed INT column may hold.
pub const MAX_INT: i64 = 0x7FFF_FFFF;

/// Errors produced while parsing an EC2 id.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Ec2IdError {
    #[error("invalid ec2 id '{0}': missing prefix")]
    MissingPrefix(String),

    #[error("invalid ec2 id '{0}': not a hexadecimal number")]
    NotHex(String),

    #[error("invalid ec2 id '{0}': out of range")]
    OutOfRange(String),

    #[error("invalid ec2 id '{id}': expected a {expected}- id")]
    WrongPrefix { id: String, expected: Ec2Prefix },
}

/// Resource prefix of an EC2 id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Ec2Prefix {
    /// Instance.
    I,
    /// Volume.
    Vol,
    /// Snapshot.
    Snap,
    /// Machine image.
    Ami,
    /// Kernel image.
    Aki,
    /// Ramdisk image.
    Ari,
}

/// Render an integer id as an EC2 id.
pub fn id_to_ec2_id(id: i64, prefix: Ec2Prefix) -> String {
    format!("{}-{:08x}", prefix.as_ref(), id)
}

/// Parse the integer part of an EC2 id, ignoring the prefix.
pub fn ec2_id_to_id(ec2_id: &str) -> Result<i64, Ec2IdError> {
    let (_, hex) = ec2_id
        .rsplit_once('-')
        .ok_or_else(|| Ec2IdError::MissingPrefix(ec2_id.to_string()))?;

    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Ec2IdError::NotHex(ec2_id.to_string()));
    }

    let id = i64::from_str_radix(hex, 16).map_err(|_| Ec2IdError::OutOfRange(ec2_id.to_string()))?;
    if !(1..=MAX_INT).contains(&id) {
        return Err(Ec2IdError::OutOfRange(ec2_id.to_string()));
    }
    Ok(id)
}

/// Parse an EC2 id and return its prefix alongside the integer id.
pub fn parse_ec2_id(ec2_id: &str) -> Result<(Ec2Prefix, i64), Ec2IdError> {
    let (prefix, _) = ec2_id
        .rsplit_once('-')
        .ok_or_else(|| Ec2IdError::MissingPrefix(ec2_id.to_string()))?;
    let prefix = prefix
        .parse::<Ec2Prefix>()
        .map_err(|_| Ec2IdError::MissingPrefix(ec2_id.to_string()))?;
    Ok((prefix, ec2_id_to_id(ec2_id)?))
}

/// Parse a command-line id: either a decimal integer or an EC2 id whose
/// prefix is one of `allowed`. The first allowed prefix names the error.
pub fn parse_ec2_id_with(ec2_id: &str, allowed: &[Ec2Prefix]) -> Result<i64, Ec2IdError> {
    if ec2_id.bytes().all(|b| b.is_ascii_digit()) && !ec2_id.is_empty() {
        return match ec2_id.parse::<i64>() {
            Ok(id) if (1..=MAX_INT).contains(&id) => Ok(id),
            _ => Err(Ec2IdError::OutOfRange(ec2_id.to_string())),
        };
    }

    let (prefix, id) = parse_ec2_id(ec2_id)?;
    if !allowed.contains(&prefix) {
        return Err(Ec2IdError::WrongPrefix {
            id: ec2_id.to_string(),
            expected: allowed.first().copied().unwrap_or(prefix),
        });
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        assert_eq!(id_to_ec2_id(10, Ec2Prefix::I), "i-0000000a");
        assert_eq!(id_to_ec2_id(255, Ec2Prefix::Vol), "vol-000000ff");
        assert_eq!(id_to_ec2_id(MAX_INT, Ec2Prefix::Snap), "snap-7fffffff");
    }

    #[test]
    fn test_parse() {
        assert_eq!(ec2_id_to_id("i-0000000a").unwrap(), 10);
        assert_eq!(ec2_id_to_id("ami-000000FF").unwrap(), 255);
        assert_eq!(
            parse_ec2_id("snap-00000003").unwrap(),
            (Ec2Prefix::Snap, 3)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(
            ec2_id_to_id("0000000a"),
            Err(Ec2IdError::MissingPrefix("0000000a".to_string()))
        );
        assert!(matches!(ec2_id_to_id("i-zz"), Err(Ec2IdError::NotHex(_))));
        assert!(matches!(ec2_id_to_id("i-"), Err(Ec2IdError::NotHex(_))));
        assert!(matches!(
            ec2_id_to_id("i-00000000"),
            Err(Ec2IdError::OutOfRange(_))
        ));
        assert!(matches!(
            ec2_id_to_id("i-80000000"),
            Err(Ec2IdError::OutOfRange(_))
        ));
        assert!(matches!(
            parse_ec2_id("xyz-00000001"),
            Err(Ec2IdError::MissingPrefix(_))
        ));
    }

    #[test]
    fn test_parse_with_allowed_prefixes() {
        assert_eq!(parse_ec2_id_with("i-0000000a", &[Ec2Prefix::I]), Ok(10));
        assert_eq!(parse_ec2_id_with("10", &[Ec2Prefix::I]), Ok(10));
        assert_eq!(
            parse_ec2_id_with("aki-00000002", &[Ec2Prefix::Ami, Ec2Prefix::Aki]),
            Ok(2)
        );

        assert_eq!(
            parse_ec2_id_with("vol-0000000a", &[Ec2Prefix::I]),
            Err(Ec2IdError::WrongPrefix {
                id: "vol-0000000a".to_string(),
                expected: Ec2Prefix::I,
            })
        );
        assert!(matches!(
            parse_ec2_id_with("-5", &[Ec2Prefix::Vol]),
            Err(Ec2IdError::MissingPrefix(_))
        ));
        assert!(matches!(
            parse_ec2_id_with("0", &[Ec2Prefix::Vol]),
            Err(Ec2IdError::OutOfRange(_))
        ));
        assert!(matches!(
            parse_ec2_id_with("2147483648", &[Ec2Prefix::Vol]),
            Err(Ec2IdError::OutOfRange(_))
        ));
    }
}
