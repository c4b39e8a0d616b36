mod helpers;
use helpers::*;

use updi_nvm::physical::{LineConfig, UpdiPhysical};
use updi_nvm::Options;

fn open(port: &SimPort, clock: &FakeClock) -> UpdiPhysical<SimPort, FakeClock, FakeError> {
    UpdiPhysical::new(port.clone(), clock.clone(), 115200, Options::default()).unwrap()
}

#[test]
fn opening_break() {
    let port = SimPort::new();
    let _phy = open(&port, &FakeClock::new(0));

    let s = port.state();
    assert_eq!(s.lines, vec![LineConfig::updi(115200)]);
    assert_eq!(s.tx, vec![0x00]);
    assert_eq!(s.dtr, vec![false]);
    assert_eq!(s.rts, vec![false]);
    // Break echo consumed
    assert!(s.rx.is_empty());
}

#[test]
fn send_drains_echo() {
    let port = SimPort::new();
    let mut phy = open(&port, &FakeClock::new(0));

    phy.send(&[0x01, 0x02, 0x03]).unwrap();

    let s = port.state();
    assert_eq!(&s.tx[1..], &[0x01, 0x02, 0x03]);
    assert!(s.rx.is_empty());
}

#[test]
fn short_receive_is_returned() {
    let port = SimPort::new();
    let mut phy = open(&port, &FakeClock::new(0));

    {
        let mut s = port.state();
        s.rx.extend(&[0xA1, 0xA2, 0xA3, 0xA4]);
        s.reads = 0;
    }

    let data = phy.receive(10).unwrap();
    assert_eq!(data, vec![0xA1, 0xA2, 0xA3, 0xA4]);

    // Four bytes then three empty reads
    assert_eq!(port.state().reads, 7);
}

#[test]
fn empty_receive_polls_with_delay() {
    let port = SimPort::new();
    let clock = FakeClock::new(0);
    let options = Options {
        poll_delay_ms: 5,
        ..Options::default()
    };
    let mut phy =
        UpdiPhysical::new(port.clone(), clock.clone(), 115200, options).unwrap();

    let before = clock.delays().len();
    assert!(phy.receive(2).unwrap().is_empty());
    assert_eq!(&clock.delays()[before..], &[5, 5, 5]);
}

#[test]
fn double_break_restores_line() {
    let port = SimPort::new();
    let clock = FakeClock::new(0);
    let mut phy = open(&port, &clock);

    phy.send_double_break().unwrap();

    let s = port.state();
    assert_eq!(
        s.lines,
        vec![
            LineConfig::updi(115200),
            LineConfig::double_break(),
            LineConfig::updi(115200),
        ]
    );
    assert_eq!(s.tx, vec![0x00, 0x00]);
    assert!(s.rx.is_empty());
    assert_eq!(clock.delays(), vec![100]);
}

#[test]
fn change_baud() {
    let port = SimPort::new();
    let mut phy = open(&port, &FakeClock::new(0));

    phy.change_baud(230400).unwrap();

    assert_eq!(phy.baud(), 230400);
    assert_eq!(port.state().lines.last(), Some(&LineConfig::updi(230400)));
}
