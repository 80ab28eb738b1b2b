mod common;
use common::*;
use smh_bridge::modbus::{decode, RegisterReader};
use smh_bridge::prelude::*;

#[test]
fn decode_is_signed_big_endian() {
    assert_eq!(decode(&[0x7f, 0xff], 1.0).unwrap(), 32767.0);
    assert_eq!(decode(&[0x80, 0x00], 1.0).unwrap(), -32768.0);
    assert_eq!(decode(&[0x13, 0x88], 100.0).unwrap(), 50.0);
    assert_eq!(decode(&[0xff, 0xff], 10.0).unwrap(), -0.1);
}

#[test]
fn decode_uses_first_register_only() {
    assert_eq!(decode(&[0x00, 0x0a, 0x12, 0x34], 1.0).unwrap(), 10.0);
}

#[test]
fn decode_short_response() {
    assert!(matches!(
        decode(&[0x01], 1.0),
        Err(ReadError::ShortResponse { len: 1 })
    ));
    assert!(matches!(
        decode(&[], 1.0),
        Err(ReadError::ShortResponse { len: 0 })
    ));
}

#[tokio::test]
async fn reads_one_register_from_requested_bank() -> Result<()> {
    common_setup();

    let transport = MockTransport::default()
        .with_value(RegisterBank::Input, 0x0010, 2300)
        .with_value(RegisterBank::Holding, 0x0010, -5);
    let mut reader = RegisterReader::new(transport.clone());

    let input = RegisterParam::new(0x0010, 10.0, RegisterBank::Input);
    let holding = RegisterParam::new(0x0010, 1.0, RegisterBank::Holding);

    assert_eq!(reader.read_float(&input).await?, 230.0);
    assert_eq!(reader.read_float(&holding).await?, -5.0);

    assert_eq!(
        transport.reads(),
        vec![
            (RegisterBank::Input, 0x0010, 1),
            (RegisterBank::Holding, 0x0010, 1)
        ]
    );

    Ok(())
}

#[tokio::test]
async fn read_errors_are_reported() {
    common_setup();

    let transport = MockTransport::default()
        .with_bytes(RegisterBank::Holding, 0x2000, vec![0x13])
        .with_timeout(RegisterBank::Holding, 0x2001);
    let mut reader = RegisterReader::new(transport);

    let short = RegisterParam::new(0x2000, 100.0, RegisterBank::Holding);
    let slow = RegisterParam::new(0x2001, 10.0, RegisterBank::Holding);
    let missing = RegisterParam::new(0x2002, 1.0, RegisterBank::Holding);

    assert!(matches!(
        reader.read_float(&short).await,
        Err(ReadError::ShortResponse { len: 1 })
    ));
    assert!(matches!(
        reader.read_float(&slow).await,
        Err(ReadError::Timeout { timeout_ms: 500 })
    ));
    assert!(matches!(
        reader.read_float(&missing).await,
        Err(ReadError::Transport(_))
    ));
}
