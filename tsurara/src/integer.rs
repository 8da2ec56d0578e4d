use {num_bigint::BigInt, std::fmt};

/// Arbitrary-precision integer, as returned by the unique-id generator.
///
/// The [`Small`][`Self::Small`] variant is used
/// whenever the value fits in an `i64`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Integer
{
    /// Value within the `i64` range.
    Small(i64),

    /// Value outside the `i64` range.
    Big(BigInt),
}

impl Integer
{
    /// The successor of this integer.
    pub fn succ(&self) -> Self
    {
        match self {
            Self::Small(n) => match n.checked_add(1) {
                Some(m) => Self::Small(m),
                None => Self::Big(BigInt::from(*n) + 1),
            },
            Self::Big(n) => Self::normalize(n + 1),
        }
    }

    /// The value as an `i64`, if it fits.
    pub fn to_i64(&self) -> Option<i64>
    {
        match self {
            Self::Small(n) => Some(*n),
            Self::Big(_) => None,
        }
    }

    fn normalize(n: BigInt) -> Self
    {
        match i64::try_from(&n) {
            Ok(n) => Self::Small(n),
            Err(_) => Self::Big(n),
        }
    }
}

impl From<i64> for Integer
{
    fn from(n: i64) -> Self
    {
        Self::Small(n)
    }
}

impl From<BigInt> for Integer
{
    fn from(n: BigInt) -> Self
    {
        Self::normalize(n)
    }
}

impl fmt::Display for Integer
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self {
            Self::Small(n) => write!(f, "{n}"),
            Self::Big(n) => write!(f, "{n}"),
        }
    }
}
