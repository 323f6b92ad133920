//! Type-erased functions.
//!
//! A [`Function`] is called through a [`FunctionShim`] with three raw pointers:
//! the instance (`this`, null for static functions), a flat parameter block laid
//! out by the function's [`ParamLayout`], and a constructed result slot. The
//! layout is computed once when the signature is built, so a call performs no
//! reflection work beyond reading arguments at fixed offsets.

use std::alloc::{self, Layout};
use std::any::TypeId;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use bitflags::bitflags;
use ustr::Ustr;

use crate::error::{InvokeError, RegistrationError};
use crate::resolver::TypeResolver;
use crate::storage::DataBlob;
use crate::type_hash::{NativeTypeHash, TypeHash};
use crate::types::{Type, TypeRef, TypeTraits};

bitflags! {
    /// How a parameter or return value is passed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParamFlags: u32 {
        /// Passed as a pointer-sized slot holding the value's address.
        const REF = 1 << 0;
        /// Not modified by the callee.
        const CONST = 1 << 1;
        /// Written by the callee.
        const OUT = 1 << 2;
    }
}

/// One parameter of a signature.
#[derive(Clone)]
pub struct ParamInfo {
    pub ty: TypeRef,
    pub flags: ParamFlags,
}

impl ParamInfo {
    pub fn new(ty: TypeRef) -> Self {
        Self {
            ty,
            flags: ParamFlags::empty(),
        }
    }

    pub fn by_ref(ty: TypeRef) -> Self {
        Self {
            ty,
            flags: ParamFlags::REF,
        }
    }

    #[inline]
    pub fn is_ref(&self) -> bool {
        self.flags.contains(ParamFlags::REF)
    }
}

impl fmt::Debug for ParamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ty.name())?;
        if self.is_ref() {
            f.write_str("&")?;
        }
        Ok(())
    }
}

/// Precomputed placement of parameters inside a flat buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParamLayout {
    pub size: usize,
    pub align: usize,
    pub offsets: Vec<usize>,
    /// Bit `i` is set when parameter `i` must be destructed after the call.
    pub destroy_mask: u64,
}

impl ParamLayout {
    fn compute(params: &[ParamInfo]) -> Self {
        let mut size = 0usize;
        let mut align = 1usize;
        let mut offsets = Vec::with_capacity(params.len());
        let mut destroy_mask = 0u64;
        for (i, param) in params.iter().enumerate() {
            let (slot_size, slot_align) = if param.is_ref() {
                (size_of::<*mut u8>(), align_of::<*mut u8>())
            } else {
                (param.ty.size(), param.ty.align())
            };
            size = size.next_multiple_of(slot_align);
            offsets.push(size);
            size += slot_size;
            align = align.max(slot_align);
            if !param.is_ref()
                && param.ty.traits().contains(TypeTraits::NEEDS_DESTRUCTOR)
                && i < 64
            {
                destroy_mask |= 1 << i;
            }
        }
        Self {
            size: size.next_multiple_of(align),
            align,
            offsets,
            destroy_mask,
        }
    }
}

/// Return and parameter types of a function.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    return_type: Option<TypeRef>,
    return_flags: ParamFlags,
    params: Vec<ParamInfo>,
    is_static: bool,
    is_const: bool,
    layout: Arc<ParamLayout>,
}

impl FunctionSignature {
    /// Build a signature. `None` as return type means `void`.
    pub fn new(return_type: Option<TypeRef>, params: Vec<ParamInfo>) -> Self {
        let layout = Arc::new(ParamLayout::compute(&params));
        Self {
            return_type,
            return_flags: ParamFlags::empty(),
            params,
            is_static: false,
            is_const: false,
            layout,
        }
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    pub fn with_const(mut self, is_const: bool) -> Self {
        self.is_const = is_const;
        self
    }

    pub fn with_return_flags(mut self, flags: ParamFlags) -> Self {
        self.return_flags = flags;
        self
    }

    pub fn return_type(&self) -> Option<&TypeRef> {
        self.return_type.as_ref()
    }

    pub fn return_flags(&self) -> ParamFlags {
        self.return_flags
    }

    pub fn params(&self) -> &[ParamInfo] {
        &self.params
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn is_const(&self) -> bool {
        self.is_const
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    fn param_hashes(&self) -> Vec<TypeHash> {
        self.params.iter().map(|p| p.ty.info().hash).collect()
    }
}

/// A flat, aligned argument block for one call.
///
/// By-value parameters are constructed when the buffer is created and
/// destructed when it is dropped.
pub struct ParamBuffer {
    layout: Arc<ParamLayout>,
    params: Vec<ParamInfo>,
    ptr: NonNull<u8>,
    alloc: Layout,
}

impl ParamBuffer {
    pub fn new(signature: &FunctionSignature) -> Self {
        let layout = Arc::clone(&signature.layout);
        let alloc = match Layout::from_size_align(layout.size.max(1), layout.align) {
            Ok(alloc) => alloc,
            Err(_) => alloc::handle_alloc_error(Layout::new::<u8>()),
        };
        // SAFETY: non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(alloc) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(alloc)
        };
        for (param, offset) in signature.params.iter().zip(&layout.offsets) {
            if !param.is_ref() && param.ty.traits().contains(TypeTraits::NEEDS_CONSTRUCTOR) {
                // SAFETY: zeroed slot sized and aligned for the parameter type.
                unsafe { param.ty.construct(ptr.as_ptr().add(*offset)) };
            }
        }
        Self {
            layout,
            params: signature.params.clone(),
            ptr,
            alloc,
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Address of parameter slot `index`.
    pub fn slot(&mut self, index: usize) -> Option<*mut u8> {
        let offset = *self.layout.offsets.get(index)?;
        // SAFETY: offsets lie inside the allocation.
        Some(unsafe { self.ptr.as_ptr().add(offset) })
    }

    /// Store a by-value argument bound to the Rust type `T`.
    pub fn set<T: 'static>(&mut self, index: usize, value: T) -> bool {
        let Some(param) = self.params.get(index) else {
            return false;
        };
        if param.is_ref() || param.ty.info().native != Some(NativeTypeHash::of::<T>()) {
            return false;
        }
        let Some(slot) = self.slot(index) else {
            return false;
        };
        // SAFETY: the slot holds a constructed `T`.
        unsafe { *slot.cast::<T>() = value };
        true
    }

    /// Copy a by-value argument of the parameter's type from `src`.
    ///
    /// # Safety
    /// `src` must hold a constructed value of the parameter's type.
    pub unsafe fn set_raw(&mut self, index: usize, src: *const u8) -> bool {
        let Some(ty) = self.params.get(index).filter(|p| !p.is_ref()).map(|p| p.ty.clone()) else {
            return false;
        };
        let Some(slot) = self.slot(index) else {
            return false;
        };
        unsafe { ty.copy(slot, src) };
        true
    }

    /// Store the address of a by-reference argument.
    pub fn set_ref(&mut self, index: usize, target: *mut u8) -> bool {
        if !self.params.get(index).is_some_and(ParamInfo::is_ref) {
            return false;
        }
        let Some(slot) = self.slot(index) else {
            return false;
        };
        // SAFETY: reference slots are pointer sized and aligned.
        unsafe { *slot.cast::<*mut u8>() = target };
        true
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for ParamBuffer {
    fn drop(&mut self) {
        for (i, param) in self.params.iter().enumerate() {
            if i < 64 && self.layout.destroy_mask & (1 << i) != 0 {
                // SAFETY: by-value parameters were constructed in `new`.
                unsafe { param.ty.destruct(self.ptr.as_ptr().add(self.layout.offsets[i])) };
            }
        }
        // SAFETY: allocated with this layout in `new`.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.alloc) };
    }
}

/// Erased entry point: `(this, params, result)`.
pub type FunctionShim = Arc<dyn Fn(*mut u8, *const u8, *mut u8) + Send + Sync>;

/// A named callable attached to a class or registered globally.
pub struct Function {
    name: Ustr,
    owner: Option<Ustr>,
    hash: TypeHash,
    signature: FunctionSignature,
    shim: FunctionShim,
}

impl Function {
    pub fn new(name: &str, signature: FunctionSignature, shim: FunctionShim) -> Self {
        let hash = TypeHash::from_function(name, &signature.param_hashes());
        Self {
            name: Ustr::from(name),
            owner: None,
            hash,
            signature,
            shim,
        }
    }

    pub(crate) fn with_owner(mut self, owner: Ustr) -> Self {
        self.hash = TypeHash::from_method(
            TypeHash::from_name(&owner),
            &self.name,
            &self.signature.param_hashes(),
        );
        self.owner = Some(owner);
        self
    }

    /// Bind a Rust closure taking `&mut C` plus up to four arguments.
    pub fn native_method<C, Args, F>(
        resolver: &dyn TypeResolver,
        name: &str,
        f: F,
    ) -> Result<Self, RegistrationError>
    where
        F: NativeMethod<C, Args>,
    {
        let signature = native_signature(resolver, &F::param_types(), F::return_type())?;
        let shim = f.into_shim(signature.layout.offsets.clone());
        Ok(Self::new(name, signature, shim))
    }

    /// Bind a Rust closure taking up to four arguments and no instance.
    pub fn native_static<Args, F>(
        resolver: &dyn TypeResolver,
        name: &str,
        f: F,
    ) -> Result<Self, RegistrationError>
    where
        F: NativeStatic<Args>,
    {
        let signature =
            native_signature(resolver, &F::param_types(), F::return_type())?.with_static(true);
        let shim = f.into_shim(signature.layout.offsets.clone());
        Ok(Self::new(name, signature, shim))
    }

    #[inline]
    pub fn name(&self) -> Ustr {
        self.name
    }

    /// Owning class, `None` for global functions.
    #[inline]
    pub fn owner(&self) -> Option<Ustr> {
        self.owner
    }

    #[inline]
    pub fn hash(&self) -> TypeHash {
        self.hash
    }

    #[inline]
    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    /// Call the function, returning the result value for non-void functions.
    ///
    /// # Safety
    /// For methods `context` must point at a constructed instance of the class
    /// the function was bound for. Reference slots in `params` must point at
    /// live values of their parameter types.
    pub unsafe fn invoke(
        &self,
        context: *mut u8,
        params: &ParamBuffer,
    ) -> Result<Option<DataBlob>, InvokeError> {
        if !Arc::ptr_eq(&params.layout, &self.signature.layout) {
            return Err(InvokeError::SignatureMismatch(self.name.to_string()));
        }
        if !self.signature.is_static && context.is_null() {
            return Err(InvokeError::MissingContext(self.name.to_string()));
        }
        match &self.signature.return_type {
            Some(ty) => {
                let mut result = DataBlob::new(Arc::clone(ty));
                (self.shim)(context, params.as_ptr(), result.as_mut_ptr());
                Ok(Some(result))
            }
            None => {
                (self.shim)(context, params.as_ptr(), std::ptr::null_mut());
                Ok(None)
            }
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("params", &self.signature.params)
            .field(
                "return",
                &self.signature.return_type.as_ref().map(|t| t.name()),
            )
            .finish_non_exhaustive()
    }
}

fn native_signature(
    resolver: &dyn TypeResolver,
    params: &[(NativeTypeHash, &'static str)],
    ret: Option<(NativeTypeHash, &'static str)>,
) -> Result<FunctionSignature, RegistrationError> {
    let lookup = |(hash, name): (NativeTypeHash, &'static str)| {
        resolver
            .find_native(hash)
            .ok_or_else(|| RegistrationError::TypeNotFound(name.to_owned()))
    };
    let params = params
        .iter()
        .map(|p| lookup(*p).map(ParamInfo::new))
        .collect::<Result<Vec<_>, _>>()?;
    let return_type = ret.map(lookup).transpose()?;
    Ok(FunctionSignature::new(return_type, params))
}

fn native_return<R: 'static>() -> Option<(NativeTypeHash, &'static str)> {
    if TypeId::of::<R>() == TypeId::of::<()>() {
        None
    } else {
        Some((NativeTypeHash::of::<R>(), std::any::type_name::<R>()))
    }
}

/// # Safety
/// `result` is null for `void` or holds a constructed `R`.
unsafe fn store_result<R: 'static>(result: *mut u8, value: R) {
    if !result.is_null() {
        unsafe { *result.cast::<R>() = value };
    }
}

/// Closures callable as methods of `C`.
pub trait NativeMethod<C, Args>: Send + Sync + 'static {
    fn param_types() -> Vec<(NativeTypeHash, &'static str)>;
    fn return_type() -> Option<(NativeTypeHash, &'static str)>;
    fn into_shim(self, offsets: Vec<usize>) -> FunctionShim;
}

/// Closures callable without an instance.
pub trait NativeStatic<Args>: Send + Sync + 'static {
    fn param_types() -> Vec<(NativeTypeHash, &'static str)>;
    fn return_type() -> Option<(NativeTypeHash, &'static str)>;
    fn into_shim(self, offsets: Vec<usize>) -> FunctionShim;
}

macro_rules! impl_native_fn {
    ($($arg:ident $idx:tt),*) => {
        impl<C, R, F, $($arg,)*> NativeMethod<C, ($($arg,)*)> for F
        where
            C: 'static,
            R: 'static,
            $($arg: Clone + 'static,)*
            F: Fn(&mut C $(, $arg)*) -> R + Send + Sync + 'static,
        {
            fn param_types() -> Vec<(NativeTypeHash, &'static str)> {
                vec![$((NativeTypeHash::of::<$arg>(), std::any::type_name::<$arg>())),*]
            }

            fn return_type() -> Option<(NativeTypeHash, &'static str)> {
                native_return::<R>()
            }

            #[allow(unused_variables)]
            fn into_shim(self, offsets: Vec<usize>) -> FunctionShim {
                Arc::new(move |context: *mut u8, params: *const u8, result: *mut u8| {
                    // SAFETY: guaranteed by `Function::invoke`'s contract.
                    unsafe {
                        let this = &mut *context.cast::<C>();
                        let value = (self)(
                            this
                            $(, (*params.add(offsets[$idx]).cast::<$arg>()).clone())*
                        );
                        store_result(result, value);
                    }
                })
            }
        }

        impl<R, F, $($arg,)*> NativeStatic<($($arg,)*)> for F
        where
            R: 'static,
            $($arg: Clone + 'static,)*
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
        {
            fn param_types() -> Vec<(NativeTypeHash, &'static str)> {
                vec![$((NativeTypeHash::of::<$arg>(), std::any::type_name::<$arg>())),*]
            }

            fn return_type() -> Option<(NativeTypeHash, &'static str)> {
                native_return::<R>()
            }

            #[allow(unused_variables)]
            fn into_shim(self, offsets: Vec<usize>) -> FunctionShim {
                Arc::new(move |_context: *mut u8, params: *const u8, result: *mut u8| {
                    // SAFETY: guaranteed by `Function::invoke`'s contract.
                    unsafe {
                        let value = (self)(
                            $((*params.add(offsets[$idx]).cast::<$arg>()).clone()),*
                        );
                        store_result(result, value);
                    }
                })
            }
        }
    };
}

impl_native_fn!();
impl_native_fn!(A0 0);
impl_native_fn!(A0 0, A1 1);
impl_native_fn!(A0 0, A1 1, A2 2);
impl_native_fn!(A0 0, A1 1, A2 2, A3 3);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SimpleType;

    struct Natives {
        int: TypeRef,
        float: TypeRef,
        string: TypeRef,
    }

    impl Natives {
        fn new() -> Self {
            Self {
                int: Arc::new(SimpleType::<i32>::new()),
                float: Arc::new(SimpleType::<f32>::new()),
                string: Arc::new(SimpleType::<String>::new()),
            }
        }
    }

    impl TypeResolver for Natives {
        fn find_type(&self, _name: &str) -> Option<TypeRef> {
            None
        }

        fn find_native(&self, hash: NativeTypeHash) -> Option<TypeRef> {
            [&self.int, &self.float, &self.string]
                .into_iter()
                .find(|t| t.info().native == Some(hash))
                .cloned()
        }
    }

    #[test]
    fn layout_packs_by_alignment() {
        let natives = Natives::new();
        let sig = FunctionSignature::new(
            None,
            vec![
                ParamInfo::new(natives.int.clone()),
                ParamInfo::by_ref(natives.float.clone()),
                ParamInfo::new(natives.string.clone()),
            ],
        );
        let layout = sig.layout();
        assert_eq!(layout.offsets[0], 0);
        assert_eq!(layout.offsets[1], size_of::<*mut u8>());
        assert_eq!(layout.offsets[2], 2 * size_of::<*mut u8>());
        assert_eq!(layout.destroy_mask, 0b100);
        assert_eq!(layout.size % layout.align, 0);
    }

    #[derive(Default)]
    struct Counter {
        total: i32,
    }

    #[test]
    fn native_method_reads_arguments_and_writes_result() {
        let natives = Natives::new();
        let add = Function::native_method(&natives, "add", |c: &mut Counter, a: i32, b: i32| {
            c.total += a + b;
            c.total
        })
        .unwrap();

        let mut params = ParamBuffer::new(add.signature());
        assert!(params.set(0, 2i32));
        assert!(params.set(1, 3i32));
        assert!(!params.set(1, 3.0f32));

        let mut counter = Counter::default();
        let context = (&mut counter as *mut Counter).cast::<u8>();
        let result = unsafe { add.invoke(context, &params) }.unwrap().unwrap();
        assert_eq!(unsafe { *result.as_ptr().cast::<i32>() }, 5);
        assert_eq!(counter.total, 5);
    }

    #[test]
    fn native_static_with_string_argument() {
        let natives = Natives::new();
        let len = Function::native_static(&natives, "len", |s: String| s.len() as i32).unwrap();
        assert!(len.signature().is_static());

        let mut params = ParamBuffer::new(len.signature());
        assert!(params.set(0, "four".to_string()));
        let result = unsafe { len.invoke(std::ptr::null_mut(), &params) }
            .unwrap()
            .unwrap();
        assert_eq!(unsafe { *result.as_ptr().cast::<i32>() }, 4);
    }

    #[test]
    fn void_function_returns_nothing() {
        let natives = Natives::new();
        let reset = Function::native_method(&natives, "reset", |c: &mut Counter| c.total = 0)
            .unwrap();
        let params = ParamBuffer::new(reset.signature());
        let mut counter = Counter { total: 9 };
        let context = (&mut counter as *mut Counter).cast::<u8>();
        assert!(unsafe { reset.invoke(context, &params) }.unwrap().is_none());
        assert_eq!(counter.total, 0);
    }

    #[test]
    fn invoke_checks_buffer_and_context() {
        let natives = Natives::new();
        let reset = Function::native_method(&natives, "reset", |c: &mut Counter| c.total = 0)
            .unwrap();
        let other = FunctionSignature::new(None, Vec::new());
        let params = ParamBuffer::new(&other);
        let mut counter = Counter::default();
        let context = (&mut counter as *mut Counter).cast::<u8>();
        assert_eq!(
            unsafe { reset.invoke(context, &params) }.unwrap_err(),
            InvokeError::SignatureMismatch("reset".into())
        );
        let params = ParamBuffer::new(reset.signature());
        assert_eq!(
            unsafe { reset.invoke(std::ptr::null_mut(), &params) }.unwrap_err(),
            InvokeError::MissingContext("reset".into())
        );
    }

    #[test]
    fn unknown_native_type_is_a_registration_error() {
        let natives = Natives::new();
        let err = Function::native_static(&natives, "f", |_: u64| ()).unwrap_err();
        assert!(matches!(err, RegistrationError::TypeNotFound(_)));
    }

    #[test]
    fn method_hash_includes_owner() {
        let natives = Natives::new();
        let a = Function::native_static(&natives, "f", || 1i32).unwrap();
        let b = Function::native_static(&natives, "f", || 1i32)
            .unwrap()
            .with_owner(Ustr::from("Point"));
        assert_ne!(a.hash(), b.hash());
        assert_eq!(b.owner().map(|o| o.as_str()), Some("Point"));
    }
}
