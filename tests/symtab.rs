//! End-to-end exercises of the library: from raw facts through
//! resolution to range queries and the wire.

use std::collections::BTreeSet;

use symtab::resolve::AddressSpaces;
use symtab::resolve::MemorySource;
use symtab::resolve::Resolver;
use symtab::resolve::SymbolSource;
use symtab::resolve::ThreadId;
use symtab::resolve::TimeInterval;
use symtab::wire::SymbolTableMessage;
use symtab::AddressBitmap;
use symtab::AddressRange;
use symtab::FileName;
use symtab::SymbolTable;

use test_log::test;


const OBJECT: &str = "/opt/app/lib/libcompute.so";

fn sample_source() -> MemorySource {
    let mut source = MemorySource::new();
    source.add_function(OBJECT, AddressRange::new(0x100, 0x1ff), "_Z7computeRK6Matrix");
    source.add_function(OBJECT, AddressRange::new(0x200, 0x22f), "_Z5solvev");
    // A clone of the same function compiled discontiguously.
    source.add_function(OBJECT, AddressRange::new(0x400, 0x42f), "_Z5solvev");
    source.add_statement(
        OBJECT,
        AddressRange::new(0x100, 0x10f),
        FileName::from_parts("compute.cc", 0),
        12,
        1,
    );
    source.add_statement(
        OBJECT,
        AddressRange::new(0x110, 0x11f),
        FileName::from_parts("compute.cc", 0),
        13,
        1,
    );
    source
}

/// Resolve a linked object in one batch, then walk samples back to
/// functions and statements through the address-space snapshot.
#[test]
fn batch_resolution_and_queries() {
    let mut spaces = AddressSpaces::new();
    let thread = ThreadId::new("node3", 9917, 1);
    let object = spaces.load_object(
        FileName::from_parts(OBJECT, 0xfeed),
        TimeInterval::new(0, 1_000),
    );
    spaces.map(
        thread.clone(),
        &object,
        AddressRange::new(0x7000_0000, 0x7000_ffff),
        TimeInterval::new(0, 1_000),
    );

    let sources: Vec<Box<dyn SymbolSource>> = vec![Box::new(sample_source())];
    let resolver = Resolver::instantiate(&spaces, sources).unwrap();
    let inconsistencies = resolver.resolve_object(&object).unwrap();
    assert_eq!(inconsistencies, vec![]);

    // A PC sample lands at absolute 0x7000_0108 at t=500.
    let (mapping, relative) = spaces.lookup(&thread, 0x7000_0108, 500).unwrap();
    assert_eq!(relative, 0x108);

    let table = mapping.object().symbol_table();
    let functions = table.functions_overlapping(AddressRange::point(relative));
    assert_eq!(functions.len(), 1);
    assert_eq!(functions[0].mangled_name(), "_Z7computeRK6Matrix");

    let statements = table.statements_overlapping(AddressRange::point(relative));
    assert_eq!(statements.len(), 1);
    assert_eq!(statements[0].file().path().to_str(), Some("compute.cc"));
    assert_eq!(statements[0].line(), 12);

    // The discontiguously compiled function consolidated into one
    // entity with two disjoint ranges.
    let solve = table
        .functions()
        .find(|function| function.mangled_name() == "_Z5solvev")
        .unwrap();
    assert_eq!(
        solve.ranges(),
        &BTreeSet::from([AddressRange::new(0x200, 0x22f), AddressRange::new(0x400, 0x42f)])
    );
}

/// Resolve lazily, only for the ranges a thread touched, and check that
/// later rounds extend the same table without disturbing earlier
/// results.
#[test]
fn incremental_resolution() {
    let mut spaces = AddressSpaces::new();
    let thread = ThreadId::new("node3", 9917, 1);
    let object = spaces.load_object(
        FileName::from_parts(OBJECT, 0xfeed),
        TimeInterval::new(0, 1_000),
    );
    spaces.map(
        thread.clone(),
        &object,
        AddressRange::new(0x7000_0000, 0x7000_ffff),
        TimeInterval::new(0, 1_000),
    );

    let sources: Vec<Box<dyn SymbolSource>> = vec![Box::new(sample_source())];
    let resolver = Resolver::instantiate(&spaces, sources).unwrap();

    // First samples only touched the compute function.
    let _inconsistencies = resolver
        .resolve(
            &thread,
            AddressRange::new(0x7000_0100, 0x7000_010f),
            TimeInterval::new(0, 100),
        )
        .unwrap();

    let compute_uid = {
        let table = object.symbol_table();
        let functions = table.functions().collect::<Vec<_>>();
        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].mangled_name(), "_Z7computeRK6Matrix");
        functions[0].uid()
    };

    // Later samples reach the solver.
    let _inconsistencies = resolver
        .resolve(
            &thread,
            AddressRange::new(0x7000_0200, 0x7000_020f),
            TimeInterval::new(100, 200),
        )
        .unwrap();

    let table = object.symbol_table();
    assert_eq!(table.functions().count(), 2);
    // The earlier entity is untouched.
    let compute = table.function(compute_uid).unwrap();
    assert_eq!(compute.mangled_name(), "_Z7computeRK6Matrix");
}

/// Ship a consolidated table over the wire and query the decoded copy.
#[test]
fn wire_round_trip() {
    let mut table = SymbolTable::new(FileName::from_parts(OBJECT, 0xfeed));
    table.add_function(AddressRange::new(0x100, 0x1ff), "_Z7computeRK6Matrix");
    table.add_statement(
        AddressRange::new(0x100, 0x10f),
        FileName::from_parts("compute.cc", 0),
        12,
        1,
    );
    let _inconsistencies = table.process_and_store();

    let mut encoded = Vec::new();
    table.to_message().encode(&mut encoded);

    let mut data = encoded.as_slice();
    let message = SymbolTableMessage::decode(&mut data).unwrap();
    assert!(data.is_empty());

    let decoded = SymbolTable::from_message(&message);
    let functions = decoded.functions_overlapping(AddressRange::point(0x180));
    assert_eq!(functions.len(), 1);
    assert_eq!(functions[0].mangled_name(), "_Z7computeRK6Matrix");
}

/// Pack the addresses of a consolidated entity into a bitmap message
/// and recover the same ranges on the other side.
#[test]
fn bitmap_interchange() {
    let mut table = SymbolTable::new(FileName::from_parts(OBJECT, 0));
    table.add_function(AddressRange::new(0x10, 0x1f), "f");
    table.add_function(AddressRange::new(0x30, 0x3f), "f");
    let _inconsistencies = table.process_and_store();

    let function = table.functions().next().unwrap();
    let addresses = function
        .ranges()
        .iter()
        .flat_map(|range| range.begin()..=range.end())
        .collect::<BTreeSet<_>>();
    let bitmap = AddressBitmap::from_addresses(&addresses);

    let message = bitmap.to_message();
    let decoded = AddressBitmap::from_message(&message).unwrap();
    assert_eq!(decoded.contiguous_ranges(true), *function.ranges());
}
