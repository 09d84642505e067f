use crate::decoder::Decoder;
use crate::encoder::Encoder;

/// A value that can be written to and read from the protobuf wire format.
///
/// Implementations are mechanical: `encode` calls one writer per field and
/// `decode` loops over [`Decoder::read_tag`], dispatching on the field number
/// and skipping unknown fields.
///
/// ```
/// use protocol_protobuf::{Decoder, Encoder, Message, tag_field_number};
///
/// #[derive(Default)]
/// struct Ping {
///     message: String,
/// }
///
/// impl Message for Ping {
///     fn encode(&self, encoder: &mut Encoder) {
///         encoder.write_string(1, &self.message, false);
///     }
///
///     fn decode(&mut self, decoder: &mut Decoder) {
///         while let Some(tag) = decoder.read_tag() {
///             match tag_field_number(tag) {
///                 1 => {
///                     if let Ok(v) = decoder.read_string(tag) {
///                         self.message = v;
///                     }
///                 }
///                 _ => decoder.skip_field(tag),
///             }
///         }
///     }
/// }
///
/// let bytes = Encoder::encode_message(&Ping { message: "hello".into() });
/// let ping: Ping = Decoder::decode_message(bytes).unwrap();
/// assert_eq!(ping.message, "hello");
/// ```
pub trait Message {
    /// Write every field of `self` to `encoder`.
    fn encode(&self, encoder: &mut Encoder);

    /// Fill `self` from `decoder`. Field failures are reported through the
    /// decoder's sticky error flag.
    fn decode(&mut self, decoder: &mut Decoder);
}
