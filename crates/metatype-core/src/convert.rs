//! Value conversion between types.
//!
//! Used when loaded data has a different type than the property it lands in,
//! and by the generic accessors in `metatype-data`. Conversion never fails
//! loudly: it returns `false` and leaves the destination in a valid state.

use crate::storage::DataBlob;
use crate::types::{
    ArrayType, BitfieldType, ClassType, EnumType, Scalar, SimpleKind, Type, print_to_string,
    read_scalar, read_simple_text as read_text, same_type, write_scalar,
    write_simple_text as write_text,
};

/// Convert the value at `src` of type `src_ty` into the value at `dst` of
/// type `dst_ty`.
///
/// Supported: identity, numeric widening and narrowing, strings and names,
/// enums by option name or raw value, bitfields by flag name or raw value,
/// handle upcasts between handles of the same strength, resource references
/// between compatible classes, class references, class instances by property
/// name, and arrays element by element.
///
/// # Safety
/// `src` and `dst` must hold constructed values of their types and must not
/// overlap.
#[cfg_attr(feature = "profiling", profiling::function)]
pub unsafe fn convert(src: *const u8, src_ty: &dyn Type, dst: *mut u8, dst_ty: &dyn Type) -> bool {
    if same_type(src_ty, dst_ty) {
        unsafe { dst_ty.copy(dst, src) };
        return true;
    }
    unsafe {
        if let Some(src_kind) = src_ty.as_simple() {
            return from_simple(src_kind, src_ty, src, dst, dst_ty);
        }
        if let Some(src_enum) = src_ty.as_enum() {
            return from_enum(src_enum, src, dst, dst_ty);
        }
        if let Some(src_bits) = src_ty.as_bitfield() {
            return from_bitfield(src_bits, src, dst, dst_ty);
        }
        if let (Some(from), Some(to)) = (src_ty.as_handle(), dst_ty.as_handle()) {
            return from.is_weak() == to.is_weak() && to.set(dst, &from.get(src));
        }
        if let (Some(from), Some(to)) = (src_ty.as_resource_ref(), dst_ty.as_resource_ref()) {
            let related = from.class().is(Some(to.class().as_ref()))
                || to.class().is(Some(from.class().as_ref()));
            if !related {
                return false;
            }
            let value = from.get(src);
            to.set(dst, value.key, value.resource);
            return true;
        }
        if let (Some(from), Some(to)) = (src_ty.as_class_ref(), dst_ty.as_class_ref()) {
            return to.set(dst, from.get(src));
        }
        if let (Some(from), Some(to)) = (src_ty.as_array(), dst_ty.as_array()) {
            return convert_array(from, src, to, dst);
        }
        if let (Some(from), Some(to)) = (src_ty.as_class(), dst_ty.as_class()) {
            return convert_class(from, src, to, dst);
        }
    }
    false
}

unsafe fn from_simple(
    kind: SimpleKind,
    src_ty: &dyn Type,
    src: *const u8,
    dst: *mut u8,
    dst_ty: &dyn Type,
) -> bool {
    unsafe {
        if let Some(dst_kind) = dst_ty.as_simple() {
            return match (read_scalar(kind, src), read_text(kind, src)) {
                (Some(_), _) if dst_kind.is_text() => {
                    write_text(dst_kind, dst, &print_to_string(src_ty, src))
                }
                (Some(scalar), _) => write_scalar(dst_kind, dst, scalar),
                (None, Some(text)) if dst_kind.is_text() => write_text(dst_kind, dst, text),
                (None, Some(text)) => dst_ty.parse(text, dst),
                (None, None) => false,
            };
        }
        if let Some(to) = dst_ty.as_enum() {
            let value = match (read_scalar(kind, src), read_text(kind, src)) {
                (Some(scalar), _) => Some(scalar.as_i64()),
                (None, Some(text)) => {
                    let text = text.trim();
                    to.option_value(text).or_else(|| text.parse().ok())
                }
                (None, None) => None,
            };
            return match value {
                Some(value) => {
                    to.write_raw(dst, value);
                    true
                }
                None => false,
            };
        }
        if let Some(to) = dst_ty.as_bitfield() {
            if let Some(scalar) = read_scalar(kind, src) {
                to.write_raw(dst, scalar.as_u64());
                return true;
            }
            return read_text(kind, src).is_some_and(|text| dst_ty.parse(text, dst));
        }
    }
    false
}

unsafe fn from_enum(from: &EnumType, src: *const u8, dst: *mut u8, dst_ty: &dyn Type) -> bool {
    unsafe {
        let value = from.read_raw(src);
        let name = from.option_name(value);
        if let Some(to) = dst_ty.as_enum() {
            let mapped = match name {
                Some(name) => to.option_value(&name),
                None => Some(value),
            };
            return match mapped {
                Some(mapped) => {
                    to.write_raw(dst, mapped);
                    true
                }
                None => false,
            };
        }
        if let Some(dst_kind) = dst_ty.as_simple() {
            if dst_kind.is_text() {
                let text = name.map_or_else(|| value.to_string(), |n| n.to_string());
                return write_text(dst_kind, dst, &text);
            }
            return write_scalar(dst_kind, dst, Scalar::Int(value));
        }
        if let Some(to) = dst_ty.as_bitfield() {
            to.write_raw(dst, value as u64);
            return true;
        }
    }
    false
}

unsafe fn from_bitfield(
    from: &BitfieldType,
    src: *const u8,
    dst: *mut u8,
    dst_ty: &dyn Type,
) -> bool {
    unsafe {
        let value = from.read_raw(src);
        if let Some(to) = dst_ty.as_bitfield() {
            let (names, rest) = from.split(value);
            let mut mapped = rest;
            for name in names {
                match to.flag_mask(&name) {
                    Some(mask) => mapped |= mask,
                    None => return false,
                }
            }
            to.write_raw(dst, mapped);
            return true;
        }
        if let Some(dst_kind) = dst_ty.as_simple() {
            if dst_kind.is_text() {
                let text = print_to_string(from, src);
                return write_text(dst_kind, dst, &text);
            }
            return write_scalar(dst_kind, dst, Scalar::Uint(value));
        }
        if let Some(to) = dst_ty.as_enum() {
            to.write_raw(dst, value as i64);
            return true;
        }
    }
    false
}

unsafe fn convert_array(from: &ArrayType, src: *const u8, to: &ArrayType, dst: *mut u8) -> bool {
    unsafe {
        let len = from.len(src);
        let len = if to.is_dynamic() {
            to.resize(dst, len);
            len
        } else {
            len.min(to.len(dst))
        };
        (0..len).all(|i| match (from.element_ptr(src, i), to.element_ptr_mut(dst, i)) {
            (Some(s), Some(d)) => convert(s, from.element().as_ref(), d, to.element().as_ref()),
            _ => false,
        })
    }
}

/// Properties are matched by name; properties only one side has are left alone.
unsafe fn convert_class(from: &ClassType, src: *const u8, to: &ClassType, dst: *mut u8) -> bool {
    let source = from.members();
    let target = to.members();
    let mut ok = true;
    for property in target.properties() {
        let Some(saved) = source.find_property(&property.name()) else {
            continue;
        };
        // convert through a scratch value so a failed conversion leaves the
        // destination property untouched
        let mut scratch = DataBlob::new(property.ty().clone());
        let converted = unsafe {
            convert(
                saved.offset_ptr(src),
                saved.ty().as_ref(),
                scratch.as_mut_ptr(),
                property.ty().as_ref(),
            )
        };
        if converted {
            unsafe { property.ty().copy(property.offset_ptr_mut(dst), scratch.as_ptr()) };
        }
        ok &= converted;
    }
    ok
}
