//! Output header construction.
//!
//! The sorted output keeps every reference, read group, program and comment of the input.
//! Its `@HD` line declares `SO:unsorted` with a `SS:unsorted:mate-bases` sub-sort, since
//! mapped-then-mate-bases order is not one of the standard sort orders, and a `@PG`
//! record chained onto the input's last program is appended.

use anyhow::Result;
use bstr::BString;
use noodles::sam::Header;
use noodles::sam::header::record::value::Map;
use noodles::sam::header::record::value::map::header::tag as header_tag;
use noodles::sam::header::record::value::map::program::tag;
use noodles::sam::header::record::value::map::{self, Program};
use std::collections::HashSet;

/// Program ID (and name) of the @PG records this tool writes.
pub const PROGRAM_ID: &str = "matesort";

/// `SO` value of sorted output.
pub const SORT_ORDER: &str = "unsorted";

/// `SS` value of sorted output.
pub const SUBSORT_ORDER: &str = "unsorted:mate-bases";

/// Get the ID of the last program in the @PG chain (for PP chaining).
///
/// This is the program no other program names in its PP tag.
#[must_use]
pub fn get_last_program_id(header: &Header) -> Option<String> {
    let programs = header.programs();
    let program_map = programs.as_ref();

    if program_map.is_empty() {
        return None;
    }

    let mut referenced: HashSet<&[u8]> = HashSet::new();
    for pg in program_map.values() {
        if let Some(pp) = pg.other_fields().get(&tag::PREVIOUS_PROGRAM_ID) {
            referenced.insert(pp.as_ref());
        }
    }

    program_map
        .keys()
        .find(|id| !referenced.contains(id.as_slice()))
        .or_else(|| program_map.keys().next())
        .map(|id| String::from_utf8_lossy(id).to_string())
}

/// Create a unique program ID by appending .1, .2, etc. if needed.
#[must_use]
pub fn make_unique_program_id(header: &Header, base_id: &str) -> String {
    let programs = header.programs();
    let program_map = programs.as_ref();

    if !program_map.contains_key(base_id.as_bytes()) {
        return base_id.to_string();
    }

    (1..)
        .map(|i| format!("{base_id}.{i}"))
        .find(|candidate| !program_map.contains_key(candidate.as_bytes()))
        .unwrap_or_else(|| base_id.to_string())
}

/// Build a @PG record, optionally chained to `previous_program`.
///
/// # Errors
///
/// Returns an error if the program record cannot be built.
pub fn build_program_record(
    version: &str,
    command_line: &str,
    previous_program: Option<&str>,
) -> Result<Map<Program>> {
    let mut builder = Map::<Program>::builder()
        .insert(tag::NAME, PROGRAM_ID)
        .insert(tag::VERSION, version)
        .insert(tag::COMMAND_LINE, command_line);

    if let Some(pp) = previous_program {
        builder = builder.insert(tag::PREVIOUS_PROGRAM_ID, pp);
    }

    Ok(builder.build()?)
}

/// Add a @PG record to `header`, chained to the last program already present.
///
/// # Errors
///
/// Returns an error if the program record cannot be added to the header.
pub fn add_pg_record(mut header: Header, version: &str, command_line: &str) -> Result<Header> {
    let previous_program = get_last_program_id(&header);
    let unique_id = make_unique_program_id(&header, PROGRAM_ID);
    let pg_record = build_program_record(version, command_line, previous_program.as_deref())?;

    header.programs_mut().add(BString::from(unique_id), pg_record)?;

    Ok(header)
}

/// Derive the header of the sorted output from the input header.
///
/// Any sort, group or sub-sort order the input declared is replaced.
///
/// # Errors
///
/// Returns an error if the `@HD` or `@PG` record cannot be built.
pub fn create_output_header(input: &Header, version: &str, command_line: &str) -> Result<Header> {
    let hd = Map::<map::Header>::builder()
        .insert(header_tag::SORT_ORDER, BString::from(SORT_ORDER))
        .insert(header_tag::SUBSORT_ORDER, BString::from(SUBSORT_ORDER))
        .build()?;

    let mut header = input.clone();
    *header.header_mut() = Some(hd);
    add_pg_record(header, version, command_line)
}

/// Whether `header` declares the order this tool produces.
#[must_use]
pub fn is_mate_sorted(header: &Header) -> bool {
    header.header().is_some_and(|hd| {
        let fields = hd.other_fields();
        let has = |key: &[u8; 2], expected: &str| {
            fields.get(key).is_some_and(|v| <_ as AsRef<[u8]>>::as_ref(v) == expected.as_bytes())
        };
        has(b"SO", SORT_ORDER) && has(b"SS", SUBSORT_ORDER)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use noodles::sam::header::record::value::map::ReferenceSequence;
    use std::num::NonZeroUsize;

    fn program<'a>(header: &'a Header, id: &str) -> &'a Map<Program> {
        header.programs().as_ref().get(id.as_bytes()).unwrap()
    }

    fn previous_program<'a>(header: &'a Header, id: &str) -> Option<&'a [u8]> {
        program(header, id)
            .other_fields()
            .get(&tag::PREVIOUS_PROGRAM_ID)
            .map(std::convert::AsRef::as_ref)
    }

    #[test]
    fn test_get_last_program_id_empty() {
        assert_eq!(get_last_program_id(&Header::default()), None);
    }

    #[test]
    fn test_get_last_program_id_chained() {
        let mut header = Header::default();
        header.programs_mut().add(BString::from("bwa"), Map::<Program>::default()).unwrap();
        let pg2 =
            Map::<Program>::builder().insert(tag::PREVIOUS_PROGRAM_ID, "bwa").build().unwrap();
        header.programs_mut().add(BString::from("samtools"), pg2).unwrap();

        assert_eq!(get_last_program_id(&header), Some("samtools".to_string()));
    }

    #[test]
    fn test_make_unique_program_id_multiple_collisions() {
        let mut header = Header::default();
        assert_eq!(make_unique_program_id(&header, PROGRAM_ID), "matesort");

        header.programs_mut().add(BString::from("matesort"), Map::<Program>::default()).unwrap();
        assert_eq!(make_unique_program_id(&header, PROGRAM_ID), "matesort.1");

        header
            .programs_mut()
            .add(BString::from("matesort.1"), Map::<Program>::default())
            .unwrap();
        assert_eq!(make_unique_program_id(&header, PROGRAM_ID), "matesort.2");
    }

    #[test]
    fn test_add_pg_record_empty_header() {
        let result = add_pg_record(Header::default(), "1.0.0", "matesort sort").unwrap();
        assert_eq!(result.programs().as_ref().len(), 1);
        let pg = program(&result, "matesort");
        assert_eq!(
            pg.other_fields().get(&tag::NAME).map(std::convert::AsRef::as_ref),
            Some(b"matesort".as_slice())
        );
        assert_eq!(
            pg.other_fields().get(&tag::VERSION).map(std::convert::AsRef::as_ref),
            Some(b"1.0.0".as_slice())
        );
        assert_eq!(
            pg.other_fields().get(&tag::COMMAND_LINE).map(std::convert::AsRef::as_ref),
            Some(b"matesort sort".as_slice())
        );
        assert!(previous_program(&result, "matesort").is_none());
    }

    #[test]
    fn test_add_pg_record_chains_to_previous_run() {
        let mut header = Header::default();
        header.programs_mut().add(BString::from("matesort"), Map::<Program>::default()).unwrap();

        let result = add_pg_record(header, "1.0.0", "matesort sort").unwrap();
        assert_eq!(result.programs().as_ref().len(), 2);
        assert_eq!(previous_program(&result, "matesort.1"), Some(b"matesort".as_slice()));
    }

    #[test]
    fn test_create_output_header_sets_sort_tags() {
        let bwa = Map::<Program>::builder().insert(tag::NAME, "bwa").build().unwrap();
        let input = Header::builder()
            .add_reference_sequence("chr1", Map::<ReferenceSequence>::new(NonZeroUsize::MIN))
            .add_program("bwa", bwa)
            .add_comment("aligned with bwa")
            .build();
        assert!(!is_mate_sorted(&input));

        let output = create_output_header(&input, "1.0.0", "matesort sort -i in.bam").unwrap();

        assert!(is_mate_sorted(&output));
        assert_eq!(output.reference_sequences(), input.reference_sequences());
        assert_eq!(output.comments(), input.comments());
        assert_eq!(previous_program(&output, "matesort"), Some(b"bwa".as_slice()));
    }

    #[test]
    fn test_create_output_header_replaces_existing_order() {
        let hd = Map::<map::Header>::builder()
            .insert(header_tag::SORT_ORDER, BString::from("coordinate"))
            .build()
            .unwrap();
        let input = Header::builder().set_header(hd).build();

        let output = create_output_header(&input, "1.0.0", "matesort sort").unwrap();
        assert!(is_mate_sorted(&output));
        assert_eq!(output.programs().as_ref().len(), 1);
    }
}
