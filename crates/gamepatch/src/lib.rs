pub mod builder;
pub mod bundle;
pub mod error;
pub mod ipa;
pub mod plist;

pub use builder::GamePatch;
pub use bundle::GAME_MODE_KEY;
pub use error::Error;
pub use ipa::{create_ipa, extract_ipa, validate_ipa, CompressionLevel, IpaPatcher};
pub use plist::{convert_file, detect_format, Dictionary, Format, Value};

pub type Result<T> = std::result::Result<T, Error>;
