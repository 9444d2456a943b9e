pub trait Serialize<'a> {
    /// Writes the non-payload part of the frame into `buf` and optionally
    /// returns a borrowed payload tail that the sender writes without copying.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
