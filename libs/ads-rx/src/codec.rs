//! Byte layout interpreter
//!
//! Decodes and encodes [`PlcValue`]s against a [`PlcType`] over raw
//! little-endian buffers, the way the controller lays them out in its process
//! image. Struct fields are placed at their declared offsets.

use bytes::{Buf, BufMut, BytesMut};
use errors::{layout_error, AdsRxError, AdsRxResult};

use crate::value::{PlcType, PlcValue};

/// Decode one value of type `ty` from the start of `data`
pub fn decode(ty: &PlcType, data: &[u8]) -> AdsRxResult<PlcValue> {
    let size = ty.size();
    if data.len() < size {
        return Err(layout_error!(
            "{} needs {} bytes, buffer has {}",
            ty,
            size,
            data.len()
        ));
    }
    let mut buf = &data[..size];

    let value = match ty {
        PlcType::Bool => PlcValue::Bool(buf.get_u8() != 0),
        PlcType::SInt => PlcValue::SInt(buf.get_i8()),
        PlcType::USInt => PlcValue::USInt(buf.get_u8()),
        PlcType::Int => PlcValue::Int(buf.get_i16_le()),
        PlcType::UInt => PlcValue::UInt(buf.get_u16_le()),
        PlcType::DInt => PlcValue::DInt(buf.get_i32_le()),
        PlcType::UDInt => PlcValue::UDInt(buf.get_u32_le()),
        PlcType::LInt => PlcValue::LInt(buf.get_i64_le()),
        PlcType::ULInt => PlcValue::ULInt(buf.get_u64_le()),
        PlcType::Real => PlcValue::Real(buf.get_f32_le()),
        PlcType::LReal => PlcValue::LReal(buf.get_f64_le()),
        PlcType::String(_) => {
            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            PlcValue::String(String::from_utf8_lossy(&buf[..end]).into_owned())
        },
        PlcType::Array(elem, len) => {
            let len = len.ok_or_else(|| layout_error!("array length unknown for {}", ty))?;
            let step = elem.size();
            let items = (0..len)
                .map(|i| decode(elem, &data[i * step..]))
                .collect::<AdsRxResult<Vec<_>>>()?;
            PlcValue::Array(items)
        },
        PlcType::Struct(layout) => {
            let fields = layout
                .fields
                .iter()
                .map(|field| Ok((field.name.clone(), decode(&field.ty, &data[field.offset..])?)))
                .collect::<AdsRxResult<Vec<_>>>()?;
            PlcValue::Struct(fields)
        },
    };
    Ok(value)
}

/// Encode `value` as type `ty`; the output is exactly `ty.size()` bytes
pub fn encode(ty: &PlcType, value: &PlcValue) -> AdsRxResult<Vec<u8>> {
    let mut buf = BytesMut::zeroed(ty.size());
    encode_into(ty, value, &mut buf[..])?;
    Ok(buf.to_vec())
}

fn mismatch(ty: &PlcType, value: &PlcValue) -> AdsRxError {
    AdsRxError::TypeMismatch {
        expected: ty.to_string(),
        actual: value.kind().to_string(),
    }
}

fn encode_into(ty: &PlcType, value: &PlcValue, out: &mut [u8]) -> AdsRxResult<()> {
    let mut buf = &mut out[..];
    match (ty, value) {
        (PlcType::Bool, PlcValue::Bool(v)) => buf.put_u8(u8::from(*v)),
        (PlcType::SInt, PlcValue::SInt(v)) => buf.put_i8(*v),
        (PlcType::USInt, PlcValue::USInt(v)) => buf.put_u8(*v),
        (PlcType::Int, PlcValue::Int(v)) => buf.put_i16_le(*v),
        (PlcType::UInt, PlcValue::UInt(v)) => buf.put_u16_le(*v),
        (PlcType::DInt, PlcValue::DInt(v)) => buf.put_i32_le(*v),
        (PlcType::UDInt, PlcValue::UDInt(v)) => buf.put_u32_le(*v),
        (PlcType::LInt, PlcValue::LInt(v)) => buf.put_i64_le(*v),
        (PlcType::ULInt, PlcValue::ULInt(v)) => buf.put_u64_le(*v),
        (PlcType::Real, PlcValue::Real(v)) => buf.put_f32_le(*v),
        (PlcType::LReal, PlcValue::LReal(v)) => buf.put_f64_le(*v),
        (PlcType::String(cap), PlcValue::String(s)) => {
            if s.len() > *cap {
                return Err(layout_error!("string of {} bytes exceeds STRING({})", s.len(), cap));
            }
            buf.put_slice(s.as_bytes());
        },
        (PlcType::Array(elem, len), PlcValue::Array(items)) => {
            let len = len.ok_or_else(|| layout_error!("array length unknown for {}", ty))?;
            if items.len() > len {
                return Err(layout_error!("{} items exceed array length {}", items.len(), len));
            }
            let step = elem.size();
            for (i, item) in items.iter().enumerate() {
                encode_into(elem, item, &mut out[i * step..(i + 1) * step])?;
            }
        },
        (PlcType::Struct(layout), PlcValue::Struct(fields)) => {
            for field in &layout.fields {
                let (_, v) = fields
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(&field.name))
                    .ok_or_else(|| layout_error!("missing field {} of {}", field.name, layout.name))?;
                let end = field.offset + field.ty.size();
                encode_into(&field.ty, v, &mut out[field.offset..end])?;
            }
        },
        (ty, value) => return Err(mismatch(ty, value)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::StructLayout;

    #[test]
    fn test_decode_little_endian_scalars() {
        assert_eq!(
            decode(&PlcType::DInt, &[0x01, 0x00, 0x00, 0x80]).unwrap(),
            PlcValue::DInt(i32::MIN + 1)
        );
        assert_eq!(
            decode(&PlcType::UInt, &[0x34, 0x12]).unwrap(),
            PlcValue::UInt(0x1234)
        );
        assert_eq!(decode(&PlcType::Bool, &[0x02]).unwrap(), PlcValue::Bool(true));
    }

    #[test]
    fn test_string_is_nul_terminated() {
        let bytes = encode(&PlcType::String(8), &PlcValue::from("PUMP")).unwrap();
        assert_eq!(bytes.len(), 9);
        assert_eq!(&bytes[..5], b"PUMP\0");
        assert_eq!(
            decode(&PlcType::String(8), &bytes).unwrap(),
            PlcValue::from("PUMP")
        );
        assert!(encode(&PlcType::String(2), &PlcValue::from("PUMP")).is_err());
    }

    #[test]
    fn test_struct_fields_at_offsets() {
        let ty = PlcType::Struct(StructLayout::packed(
            "ST_Axis",
            vec![
                ("Enable".into(), PlcType::Bool),
                ("Position".into(), PlcType::LReal),
                (
                    "Limits".into(),
                    PlcType::Array(Box::new(PlcType::Int), Some(2)),
                ),
            ],
        ));
        let value = PlcValue::Struct(vec![
            ("Enable".into(), PlcValue::Bool(true)),
            ("Position".into(), PlcValue::LReal(-3.25)),
            ("Limits".into(), PlcValue::from(vec![-100i16, 100])),
        ]);

        let bytes = encode(&ty, &value).unwrap();
        assert_eq!(bytes.len(), 13);
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[9..11], &(-100i16).to_le_bytes());
        assert_eq!(decode(&ty, &bytes).unwrap(), value);
    }

    #[test]
    fn test_short_buffer_and_mismatch() {
        assert!(decode(&PlcType::LReal, &[0u8; 4]).is_err());
        let err = encode(&PlcType::Real, &PlcValue::Bool(true)).unwrap_err();
        assert!(matches!(err, AdsRxError::TypeMismatch { .. }));
    }

    #[test]
    fn test_array_without_length_is_rejected() {
        let ty = PlcType::Array(Box::new(PlcType::DInt), None);
        assert!(encode(&ty, &PlcValue::Array(vec![])).is_err());
        assert_eq!(
            decode(&ty.with_length(2), &[0u8; 8]).unwrap(),
            PlcValue::Array(vec![PlcValue::DInt(0), PlcValue::DInt(0)])
        );
    }
}
