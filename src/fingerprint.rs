/// Derives a short, stable identifier from the contents of a buffer.
///
/// Only used to match images with patches, never to validate a patch.
pub trait Fingerprint {
    fn fingerprint(&self, data: &[u8]) -> String;
}

/// IEEE CRC32, rendered as eight upper-case hex digits.
#[derive(Clone, Copy, Debug, Default)]
pub struct Crc32;

impl Fingerprint for Crc32 {
    fn fingerprint(&self, data: &[u8]) -> String {
        format!("{:08X}", crc32fast::hash(data))
    }
}

impl<F> Fingerprint for F
where
    F: Fn(&[u8]) -> String,
{
    fn fingerprint(&self, data: &[u8]) -> String {
        self(data)
    }
}
