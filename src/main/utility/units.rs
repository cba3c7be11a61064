/*!
Types for parsing/deserializing unit values from the configuration.

```
# use shadow_netcore::utility::units::*;
# use std::str::FromStr;
let time = Time::from_str("10 min").unwrap();
assert_eq!(time, Time::new(10, TimePrefix::Min));
assert_eq!(time.convert(TimePrefix::Sec).unwrap(), Time::new(600, TimePrefix::Sec));

let freq: Frequency<SiPrefixUpper> = Frequency::from_str("2500 MHz").unwrap();
assert_eq!(freq.as_khz().unwrap(), 2_500_000);
```

Values are integers. A value without a unit is in the unit's base (seconds, bytes, hertz).
*/

use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::de::{Deserialize, Deserializer, Visitor};
use serde::ser::{Serialize, Serializer};

use crate::core::support::simulation_time::SimulationTime;

/// The prefix of a unit value denoting magnitude.
pub trait Prefix:
    Clone + Copy + Default + PartialEq + FromStr<Err = String> + Display + Debug
{
    /// The magnitude of this prefix relative to other prefixes of this type.
    fn relative_magnitude(&self) -> u128;

    /// An integer conversion factor, or an error if converting would lose precision.
    fn conversion_factor(&self, to: Self) -> Result<u128, String> {
        let from_mag = self.relative_magnitude();
        let to_mag = to.relative_magnitude();
        if from_mag % to_mag != 0 {
            return Err(format!("Converting from '{self}' to '{to}' would lose precision"));
        }
        Ok(from_mag / to_mag)
    }
}

/// SI prefixes larger than the base unit, and their base-2 counterparts.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum SiPrefixUpper {
    #[default]
    Base,
    Kilo,
    Kibi,
    Mega,
    Mebi,
    Giga,
    Gibi,
}

impl FromStr for SiPrefixUpper {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "K" | "k" | "kilo" => Ok(Self::Kilo),
            "Ki" | "kibi" => Ok(Self::Kibi),
            "M" | "mega" => Ok(Self::Mega),
            "Mi" | "mebi" => Ok(Self::Mebi),
            "G" | "giga" => Ok(Self::Giga),
            "Gi" | "gibi" => Ok(Self::Gibi),
            _ => Err(format!(
                "Unit prefix '{s}' was not one of (K|k|kilo|Ki|kibi|M|mega|Mi|mebi|G|giga|Gi|gibi)"
            )),
        }
    }
}

impl Display for SiPrefixUpper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Base => "",
            Self::Kilo => "K",
            Self::Kibi => "Ki",
            Self::Mega => "M",
            Self::Mebi => "Mi",
            Self::Giga => "G",
            Self::Gibi => "Gi",
        };
        f.write_str(s)
    }
}

impl Prefix for SiPrefixUpper {
    fn relative_magnitude(&self) -> u128 {
        match self {
            Self::Base => 1,
            Self::Kilo => 1_000,
            Self::Kibi => 1 << 10,
            Self::Mega => 1_000_000,
            Self::Mebi => 1 << 20,
            Self::Giga => 1_000_000_000,
            Self::Gibi => 1 << 30,
        }
    }
}

/// Time units. These aren't really prefixes since they include the whole unit ("ms", "min"), but
/// treating them as prefixes of a suffix-less [`Time`] unit keeps the parsing code shared.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum TimePrefix {
    Nano,
    Micro,
    Milli,
    #[default]
    Sec,
    Min,
    Hour,
}

impl FromStr for TimePrefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ns" | "nanosecond" | "nanoseconds" => Ok(Self::Nano),
            "us" | "μs" | "microsecond" | "microseconds" => Ok(Self::Micro),
            "ms" | "millisecond" | "milliseconds" => Ok(Self::Milli),
            "s" | "sec" | "secs" | "second" | "seconds" => Ok(Self::Sec),
            "m" | "min" | "mins" | "minute" | "minutes" => Ok(Self::Min),
            "h" | "hr" | "hrs" | "hour" | "hours" => Ok(Self::Hour),
            _ => Err(format!(
                "Time unit '{s}' was not one of (ns|nanosecond(s)|us|μs|microsecond(s)\
                |ms|millisecond(s)|s|sec(s)|second(s)|m|min(s)|minute(s)|h|hr(s)|hour(s))"
            )),
        }
    }
}

impl Display for TimePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Nano => "ns",
            Self::Micro => "μs",
            Self::Milli => "ms",
            Self::Sec => "sec",
            Self::Min => "min",
            Self::Hour => "hour",
        };
        f.write_str(s)
    }
}

impl Prefix for TimePrefix {
    fn relative_magnitude(&self) -> u128 {
        // in nanoseconds
        match self {
            Self::Nano => 1,
            Self::Micro => 1_000,
            Self::Milli => 1_000_000,
            Self::Sec => 1_000_000_000,
            Self::Min => 60 * 1_000_000_000,
            Self::Hour => 60 * 60 * 1_000_000_000,
        }
    }
}

/// A unit containing an integer value, a prefix, and the suffix strings it accepts.
pub trait Unit: Sized {
    type T: Prefix;

    /// The value in the size of the current prefix.
    fn value(&self) -> u64;

    fn prefix(&self) -> Self::T;

    /// Accepted suffixes. The first is used when formatting.
    fn suffixes() -> &'static [&'static str];

    /// Convert the value to a different prefix, or return an error if the conversion would lose
    /// precision or overflow.
    fn convert(&self, prefix: Self::T) -> Result<Self, String>;
}

// "<integer> <prefix><suffix>", where the whitespace is optional
static UNIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([+-]?[0-9\.]*)\s*(.*)$").unwrap());

fn split_value_and_unit(s: &str) -> Result<(&str, &str), String> {
    let captures = UNIT_RE
        .captures(s.trim())
        .ok_or_else(|| format!("Unable to identify the value and unit in '{s}'"))?;
    let value = captures.get(1).map(|x| x.as_str().trim()).unwrap_or("");
    let unit = captures.get(2).map(|x| x.as_str().trim()).unwrap_or("");
    Ok((value, unit))
}

macro_rules! unit_impl {
    ($name:ident, $suffixes:expr) => {
        impl<T: Prefix> $name<T> {
            pub const fn new(value: u64, prefix: T) -> Self {
                Self { value, prefix }
            }
        }

        impl<T: Prefix> Default for $name<T> {
            fn default() -> Self {
                Self::new(0, T::default())
            }
        }

        impl<T: Prefix> Unit for $name<T> {
            type T = T;

            fn value(&self) -> u64 {
                self.value
            }

            fn prefix(&self) -> T {
                self.prefix
            }

            fn suffixes() -> &'static [&'static str] {
                &$suffixes
            }

            fn convert(&self, prefix: T) -> Result<Self, String> {
                let factor = self.prefix.conversion_factor(prefix)?;
                let value = u128::from(self.value)
                    .checked_mul(factor)
                    .and_then(|x| u64::try_from(x).ok())
                    .ok_or_else(|| format!("Converting '{self}' to '{prefix}' overflows"))?;
                Ok(Self::new(value, prefix))
            }
        }

        impl<T: Prefix> Display for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} {}{}", self.value, self.prefix, Self::suffixes()[0])
            }
        }

        impl<T: Prefix> FromStr for $name<T> {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let (value, unit) = split_value_and_unit(s)?;

                // the first suffix that matches, longest suffixes first
                let mut suffixes = Self::suffixes().to_vec();
                suffixes.sort_by_key(|x| std::cmp::Reverse(x.len()));
                let prefix = suffixes
                    .iter()
                    .find_map(|suffix| unit.strip_suffix(suffix))
                    .unwrap_or(unit);

                let prefix = match prefix {
                    "" => T::default(),
                    x => T::from_str(x)?,
                };

                let value = value
                    .parse()
                    .map_err(|e| format!("Invalid value '{value}' in '{s}': {e}"))?;

                Ok(Self::new(value, prefix))
            }
        }

        impl<'de, T: Prefix> Deserialize<'de> for $name<T> {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct ValueVisitor<T>(std::marker::PhantomData<T>);

                impl<'de, T: Prefix> Visitor<'de> for ValueVisitor<T> {
                    type Value = $name<T>;

                    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                        formatter.write_str(concat!(
                            "an integer or a string like '10 ",
                            stringify!($name),
                            "'"
                        ))
                    }

                    fn visit_str<E: serde::de::Error>(self, s: &str) -> Result<Self::Value, E> {
                        Self::Value::from_str(s).map_err(E::custom)
                    }

                    fn visit_u64<E: serde::de::Error>(self, x: u64) -> Result<Self::Value, E> {
                        Ok(Self::Value::new(x, T::default()))
                    }

                    fn visit_i64<E: serde::de::Error>(self, x: i64) -> Result<Self::Value, E> {
                        let x = u64::try_from(x).map_err(E::custom)?;
                        Ok(Self::Value::new(x, T::default()))
                    }
                }

                deserializer.deserialize_any(ValueVisitor(std::marker::PhantomData))
            }
        }

        impl<T: Prefix> Serialize for $name<T> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<T: Prefix> JsonSchema for $name<T> {
            fn is_referenceable() -> bool {
                false
            }

            fn schema_name() -> String {
                stringify!($name).to_owned()
            }

            fn json_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
                schemars::schema::SchemaObject {
                    instance_type: Some(schemars::schema::InstanceType::String.into()),
                    format: Some(stringify!($name).to_owned()),
                    ..Default::default()
                }
                .into()
            }
        }
    };
}

/// An amount of time. Only the [`TimePrefix`] should be used with this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time<T: Prefix> {
    value: u64,
    prefix: T,
}

// the time "prefixes" already contain the unit, so there's no suffix
unit_impl!(Time, [""]);

impl Time<TimePrefix> {
    pub fn as_simtime(&self) -> Result<SimulationTime, String> {
        let nanos = self.convert(TimePrefix::Nano)?.value;
        SimulationTime::try_from_nanos(nanos)
            .ok_or_else(|| format!("'{self}' is larger than the maximum simulation time"))
    }
}

/// A number of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bytes<T: Prefix> {
    value: u64,
    prefix: T,
}

unit_impl!(Bytes, ["B", "byte", "bytes"]);

impl Bytes<SiPrefixUpper> {
    pub fn as_bytes(&self) -> Result<u64, String> {
        Ok(self.convert(SiPrefixUpper::Base)?.value)
    }
}

/// A clock frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frequency<T: Prefix> {
    value: u64,
    prefix: T,
}

unit_impl!(Frequency, ["Hz", "hertz"]);

impl Frequency<SiPrefixUpper> {
    /// The frequency in kHz, rounded down.
    pub fn as_khz(&self) -> Result<u64, String> {
        Ok(self.convert(SiPrefixUpper::Base)?.value / 1000)
    }
}
