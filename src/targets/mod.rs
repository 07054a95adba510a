pub mod abba;
pub mod obfuscator_io;
