use halo::{Deserialize, Frame, Hello, Serialize};
use tokio::io;

struct MyStr<'a>(&'a str);

impl<'a> Serialize<'a> for MyStr<'_> {
    fn serialize(&'a self, _buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        Some(self.0.as_bytes())
    }
}

impl<'a> Deserialize<'a> for MyStr<'a> {
    fn deserialize(buf: &'a [u8]) -> std::io::Result<Self> {
        Ok(Self(str::from_utf8(buf).unwrap()))
    }
}

#[tokio::test]
async fn send_recv() {
    const SIZE: usize = 128;

    let msg = MyStr("Hello, world!");

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = halo::channel(rx, tx);

    tx.send(&msg).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = halo::channel(rx, tx);

    let mut buf: Vec<u64> = Vec::new();
    let s: MyStr = rx.recv_into(&mut buf).await.unwrap();

    assert_eq!(msg.0, s.0);
}

#[tokio::test]
async fn data_frame_roundtrip() {
    const SIZE: usize = 4096;

    let nums = [1.0f64, -2.5, 3.25, f64::MIN_POSITIVE];

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = halo::channel(rx, tx);

    tx.send(&Frame::Data {
        tag: 42,
        nums: &nums,
    })
    .await
    .unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = halo::channel(rx, tx);

    let mut buf: Vec<u64> = Vec::new();
    match rx.recv_into(&mut buf).await.unwrap() {
        Frame::Data { tag, nums: got } => {
            assert_eq!(tag, 42);
            assert_eq!(got, nums);
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[test]
fn ragged_data_payload_is_rejected() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&2u32.to_be_bytes()); // data kind
    buf.extend_from_slice(&7u32.to_be_bytes()); // tag
    buf.extend_from_slice(&[1, 2, 3]); // not a whole number of f64s

    let err = Frame::deserialize(&buf).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[tokio::test]
async fn hello_frame_roundtrip() {
    const SIZE: usize = 128;

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = halo::channel(rx, tx);

    tx.send(&Frame::Hello(Hello { rank: 3 })).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = halo::channel(rx, tx);

    let mut buf: Vec<u64> = Vec::new();
    match rx.recv_into(&mut buf).await.unwrap() {
        Frame::Hello(Hello { rank }) => assert_eq!(rank, 3),
        other => panic!("unexpected frame: {other:?}"),
    }
}
