//! End-to-end: streams registered on an engine, played through the MPE sink
//! into an in-memory port, across live reloads.

use contour::midi_io::cc;
use contour::{Engine, MemoryPort, MidiMessage, Modifier, MpeSink, Signal};
use contourconf::{EngineConfig, MidiConfig};
use pretty_assertions::assert_eq;

fn engine_with_port() -> (Engine, MemoryPort) {
    let port = MemoryPort::new();
    let mut engine = Engine::new(EngineConfig::default());
    engine
        .add_sink(Box::new(MpeSink::new(port.clone(), &MidiConfig::default())))
        .unwrap();
    // Drop the bend range setup sent by init
    port.take();
    (engine, port)
}

fn note_ons(messages: &[MidiMessage]) -> Vec<u8> {
    messages
        .iter()
        .filter_map(|m| match m {
            MidiMessage::NoteOn { pitch, .. } => Some(*pitch),
            _ => None,
        })
        .collect()
}

fn note_offs(messages: &[MidiMessage]) -> Vec<u8> {
    messages
        .iter()
        .filter_map(|m| match m {
            MidiMessage::NoteOff { pitch, .. } => Some(*pitch),
            _ => None,
        })
        .collect()
}

#[test]
fn arpeggio_plays_each_step_once() {
    let (mut engine, port) = engine_with_port();
    let arp = engine
        .sequence([60.0, 64.0, 67.0], Signal::time().mul(10.0))
        .unwrap();
    engine.register("arp", arp);

    for t in [0.05, 0.15, 0.16, 0.25, 0.35, 0.45] {
        engine.tick_at(t);
    }

    let sent = port.take();
    assert_eq!(note_ons(&sent), vec![64, 67, 60, 64]);
    // Each new note releases the one before it
    assert_eq!(note_offs(&sent), vec![64, 67, 60]);
}

#[test]
fn gate_shortens_notes_without_adding_triggers() {
    let (mut engine, port) = engine_with_port();
    let mut arp = engine.sequence([60.0, 62.0], Signal::time().mul(10.0)).unwrap();
    arp.gate(Modifier::phase(|p| if p < 0.3 { 1.0 } else { 0.0 }));
    engine.register("arp", arp);

    engine.tick_at(0.05);
    engine.tick_at(0.12);
    assert_eq!(note_ons(&port.take()), vec![62]);

    engine.tick_at(0.15);
    let sent = port.take();
    assert_eq!(note_offs(&sent), vec![62]);
    assert!(note_ons(&sent).is_empty());
}

#[test]
fn reload_with_same_program_does_not_retrigger() {
    let (mut engine, port) = engine_with_port();
    let program = |e: &mut Engine| -> anyhow::Result<()> {
        let s = e.sequence([60.0, 62.0], Signal::time().mul(10.0))?;
        e.register("a", s);
        Ok(())
    };

    engine.reload(program).unwrap();
    engine.tick_at(0.05);
    engine.tick_at(0.15);
    assert_eq!(note_ons(&port.take()), vec![62]);

    engine.reload(program).unwrap();
    engine.tick_at(0.17);
    let sent = port.take();
    // The replaced stream's voice is released, and the unchanged floor
    // does not start a new one
    assert_eq!(note_offs(&sent), vec![62]);
    assert!(note_ons(&sent).is_empty());

    engine.tick_at(0.25);
    assert_eq!(note_ons(&port.take()), vec![60]);
}

#[test]
fn reload_without_a_stream_silences_it() {
    let (mut engine, port) = engine_with_port();
    engine
        .reload(|e| {
            let a = e.sequence([48.0], Signal::time().mul(10.0))?;
            let b = e.sequence([72.0], Signal::time().mul(10.0))?;
            e.register("a", a);
            e.register("b", b);
            Ok(())
        })
        .unwrap();
    engine.tick_at(0.05);
    engine.tick_at(0.15);
    port.take();

    let removed = engine
        .reload(|e| {
            let b = e.sequence([72.0], Signal::time().mul(10.0))?;
            e.register("b", b);
            Ok(())
        })
        .unwrap();

    assert_eq!(removed, vec!["a".to_string()]);
    let sent = port.take();
    assert!(note_offs(&sent).contains(&48));
    assert_eq!(
        engine.registry().names().collect::<Vec<_>>(),
        vec!["b"]
    );
}

#[test]
fn failing_program_leaves_music_playing() {
    let (mut engine, port) = engine_with_port();
    let s = engine.sequence([60.0, 62.0], Signal::time().mul(10.0)).unwrap();
    engine.register("a", s);
    engine.tick_at(0.05);

    let err = engine
        .reload(|_| Err(anyhow::anyhow!("undefined variable `lead`")))
        .unwrap_err();
    assert!(err.to_string().contains("lead"));

    engine.tick_at(0.15);
    assert_eq!(note_ons(&port.take()), vec![62]);
}

#[test]
fn mask_drops_crossings_until_it_opens() {
    let (mut engine, port) = engine_with_port();
    let mut s = engine
        .sequence([60.0, 61.0, 62.0, 63.0], Signal::time().mul(10.0))
        .unwrap();
    s.mask(Signal::time().gte(0.3));
    engine.register("a", s);

    for t in [0.05, 0.15, 0.25, 0.295, 0.305, 0.31] {
        engine.tick_at(t);
    }
    assert_eq!(note_ons(&port.take()), vec![63]);
}

#[test]
fn expression_reaches_the_voice_channel() {
    let (mut engine, port) = engine_with_port();
    let mut s = engine.sequence([60.0], Signal::time().mul(10.0)).unwrap();
    s.pressure(1.0).slide(0.5).bend(Signal::constant(12.0));
    engine.register("a", s);

    engine.tick_at(0.05);
    port.take();
    engine.tick_at(0.15);

    let sent = port.take();
    let channel = sent
        .iter()
        .find_map(|m| match m {
            MidiMessage::NoteOn { channel, .. } => Some(*channel),
            _ => None,
        })
        .unwrap();
    assert!(sent.contains(&MidiMessage::ChannelPressure {
        channel,
        pressure: 127
    }));
    assert!(sent.contains(&MidiMessage::ControlChange {
        channel,
        controller: cc::SLIDE,
        value: 64
    }));
    assert!(sent.contains(&MidiMessage::PitchBend {
        channel,
        value: 2048
    }));
}

#[test]
fn chords_take_a_channel_per_pitch() {
    let (mut engine, port) = engine_with_port();
    let s = engine
        .sequence([vec![60.0, 64.0, 67.0]], Signal::time().mul(10.0))
        .unwrap();
    engine.register("pad", s);

    engine.tick_at(0.05);
    engine.tick_at(0.15);

    let channels: Vec<u8> = port
        .take()
        .iter()
        .filter_map(|m| match m {
            MidiMessage::NoteOn { channel, .. } => Some(*channel),
            _ => None,
        })
        .collect();
    assert_eq!(channels, vec![0, 1, 2]);
}

#[test]
fn two_sinks_receive_the_same_notes() {
    let first = MemoryPort::new();
    let second = MemoryPort::new();
    let mut engine = Engine::default();
    for port in [&first, &second] {
        let sink = MpeSink::new(port.clone(), &MidiConfig::default());
        engine.add_sink(Box::new(sink)).unwrap();
    }
    first.take();
    second.take();

    let s = engine.sequence([60.0, 65.0], Signal::time().mul(10.0)).unwrap();
    engine.register("a", s);
    engine.tick_at(0.05);
    engine.tick_at(0.15);

    assert_eq!(note_ons(&first.take()), vec![65]);
    assert_eq!(note_ons(&second.take()), vec![65]);
}
