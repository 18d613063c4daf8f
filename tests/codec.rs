use natlobby::{encode_float, encode_int, write_float, write_int, Message, Reader, MAX_PAYLOAD_BYTES};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Value {
    Int(i32),
    Float(f32),
}

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(Value::Int),
        any::<f32>().prop_filter("finite", |value| value.is_finite()).prop_map(Value::Float),
    ]
}

proptest! {
    #[test]
    fn prop_payload_values_survive(values in prop::collection::vec(value_strategy(), 0..32)) {
        let mut payload = vec![];
        for value in &values {
            match value {
                Value::Int(value) => write_int(&mut payload, *value),
                Value::Float(value) => write_float(&mut payload, *value),
            }
        }
        prop_assert_eq!(payload.len(), values.len() * 4);

        let frame = Message::Standard(&payload).encode().unwrap();
        let message = Message::decode(&frame).unwrap();
        let received = match message {
            Message::Standard(received) => received,
            other => panic!("unexpected message {:?}", other),
        };

        let mut reader = Reader::new(received);
        for value in &values {
            match value {
                Value::Int(value) => prop_assert_eq!(reader.read_int().unwrap(), *value),
                Value::Float(value) => prop_assert_eq!(reader.read_float().unwrap().to_bits(), value.to_bits()),
            }
        }
        prop_assert!(reader.finish().is_ok());
    }

    #[test]
    fn prop_ints_are_big_endian(value in any::<i32>()) {
        prop_assert_eq!(encode_int(value), value.to_be_bytes());
    }

    #[test]
    fn prop_floats_are_big_endian(value in any::<f32>()) {
        prop_assert_eq!(encode_float(value), value.to_bits().to_be_bytes());
    }

    #[test]
    fn prop_decode_never_panics(frame in prop::collection::vec(any::<u8>(), 0..MAX_PAYLOAD_BYTES + 8)) {
        let _ = Message::decode(&frame);
    }
}
