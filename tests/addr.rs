use netlane::IpAddress;

#[test]
fn well_known_addresses() {
    assert_eq!(IpAddress::ANY.octets(), [0, 0, 0, 0]);
    assert_eq!(IpAddress::LOCALHOST.octets(), [127, 0, 0, 1]);
    assert_eq!(IpAddress::BROADCAST.octets(), [255, 255, 255, 255]);
}

#[test]
fn integer_round_trip() {
    let address = IpAddress::new(192, 168, 1, 42);
    assert_eq!(address.to_u32(), 0xC0A8_012A);
    assert_eq!(IpAddress::from_u32(0xC0A8_012A), address);
}

#[test]
fn display_is_dotted_quad() {
    assert_eq!(IpAddress::new(10, 0, 0, 1).to_string(), "10.0.0.1");
    assert_eq!(IpAddress::BROADCAST.to_string(), "255.255.255.255");
}

#[test]
fn resolve_dotted_quad() {
    assert_eq!(IpAddress::resolve("192.168.0.1"), Some(IpAddress::new(192, 168, 0, 1)));
    assert_eq!(IpAddress::resolve("127.0.0.1"), Some(IpAddress::LOCALHOST));
}

#[test]
fn resolve_handles_the_special_forms() {
    // These two need explicit handling: 255.255.255.255 doubles as the
    // error value of the legacy conversion APIs.
    assert_eq!(IpAddress::resolve("255.255.255.255"), Some(IpAddress::BROADCAST));
    assert_eq!(IpAddress::resolve("0.0.0.0"), Some(IpAddress::ANY));
}

#[test]
fn resolve_localhost_by_name() {
    assert_eq!(IpAddress::resolve("localhost"), Some(IpAddress::LOCALHOST));
}

#[test]
fn resolve_garbage_fails() {
    assert_eq!(IpAddress::resolve(""), None);
    assert_eq!(IpAddress::resolve("not an address"), None);
    assert_eq!(IpAddress::resolve("999.999.999.999"), None);
}

#[test]
fn local_address_is_not_loopback_garbage() {
    // May be None on a machine with no network stack; when present it
    // must at least be a well-formed, non-broadcast address.
    if let Some(address) = IpAddress::local_address() {
        assert_ne!(address, IpAddress::BROADCAST);
    }
}

#[test]
fn ordering_is_derived_from_octets() {
    assert!(IpAddress::new(1, 0, 0, 0) < IpAddress::new(2, 0, 0, 0));
    assert!(IpAddress::ANY < IpAddress::BROADCAST);
}
