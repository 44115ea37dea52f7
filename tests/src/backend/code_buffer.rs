use jit_backend::code_buffer::CodeBuffer;

#[test]
fn test_emit_and_read() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u8(0x90); // NOP
    buf.emit_u32(0xDEADBEEF);
    assert_eq!(buf.offset(), 5);
    assert_eq!(buf.as_slice()[0], 0x90);
    assert_eq!(buf.read_u32(1), 0xDEADBEEF);
}

#[test]
fn test_patch() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u32(0);
    buf.patch_u32(0, 0x12345678);
    assert_eq!(buf.read_u32(0), 0x12345678);
}

#[test]
fn test_patch_past_end_ignored() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u16(0xffff);
    buf.patch_u32(0, 0x12345678);
    assert_eq!(buf.as_slice(), &[0xff, 0xff]);
}

#[test]
fn test_size_rounded_to_pages() {
    let buf = CodeBuffer::new(1).unwrap();
    assert!(buf.capacity() >= 4096);
    assert_eq!(buf.remaining(), buf.capacity());
}

#[test]
fn test_overflow_latches_until_rewind() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let cap = buf.capacity();
    buf.emit_bytes(&vec![0xcc; cap - 2]);
    assert!(!buf.overflowed());

    buf.emit_u32(1);
    assert!(buf.overflowed());
    assert_eq!(buf.offset(), cap - 2);

    // Small writes that would fit are dropped too once latched.
    buf.emit_u8(0);
    assert_eq!(buf.offset(), cap - 2);

    buf.rewind(0);
    assert!(!buf.overflowed());
    buf.emit_u8(0x90);
    assert_eq!(buf.offset(), 1);
}

#[test]
fn test_permissions() {
    let buf = CodeBuffer::new(4096).unwrap();
    buf.set_executable().unwrap();
    buf.set_writable().unwrap();
}
