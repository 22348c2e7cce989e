//! Integration tests: lay out small MEI documents end to end.

use engravelib::{layout_mei, BeamPlace, LayoutOptions, LayoutReport, StaffRel, StemDirection};
use pretty_assertions::assert_eq;

/// Wrap layer content in a one-staff, one-measure MEI document.
fn single_layer(content: &str) -> String {
    format!(
        r#"<mei xmlns="http://www.music-encoding.org/ns/mei">
  <music><body><mdiv><score>
    <scoreDef><staffGrp><staffDef n="1" lines="5" clef.shape="G" clef.line="2"/></staffGrp></scoreDef>
    <section><measure xml:id="m1"><staff n="1"><layer n="1">
      {content}
    </layer></staff></measure></section>
  </score></mdiv></body></music>
</mei>"#
    )
}

fn layout(content: &str) -> LayoutReport {
    layout_mei(&single_layer(content), &LayoutOptions::default()).expect("layout failed")
}

// ─── Chords ─────────────────────────────────────────────────────────

#[test]
fn chord_seconds_form_one_cluster() {
    // Diatonic pitches 60, 61, 62 and 65
    let report = layout(
        r#"<chord xml:id="c1" dur="4">
             <note xml:id="e9" pname="e" oct="9"/>
             <note xml:id="g8" pname="g" oct="8"/>
             <note xml:id="b8" pname="b" oct="8"/>
             <note xml:id="a8" pname="a" oct="8"/>
           </chord>"#,
    );
    assert_eq!(report.measures, 1);
    assert_eq!(report.chords.len(), 1);
    let chord = &report.chords[0];

    assert_eq!(chord.clusters, vec![vec!["g8".to_string(), "a8".to_string(), "b8".to_string()]]);
    let ids: Vec<&str> = chord.notes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["g8", "a8", "b8", "e9"]);
    let positions: Vec<Option<usize>> = chord.notes.iter().map(|n| n.cluster_position).collect();
    assert_eq!(positions, vec![Some(1), Some(2), Some(3), None]);

    // High chord: stem down, the middle note of the cluster flips left
    assert_eq!(chord.stem_dir, StemDirection::Down);
    let offsets: Vec<i32> = chord.notes.iter().map(|n| n.offset).collect();
    assert_eq!(offsets, vec![0, -198, 0, 0]);
}

#[test]
fn chord_accidentals_sit_left_of_the_noteheads() {
    let report = layout(
        r#"<chord dur="2">
             <note xml:id="low" pname="c" oct="4" accid="s"/>
             <note xml:id="mid" pname="e" oct="4"/>
             <note xml:id="high" pname="g" oct="4" accid="f"/>
           </chord>"#,
    );
    let chord = &report.chords[0];
    assert!(chord.clusters.is_empty());
    for note in &chord.notes {
        match note.id.as_str() {
            "mid" => assert_eq!(note.accid_x, None),
            _ => {
                let accid_x = note.accid_x.expect("accidental placed");
                assert!(accid_x < note.x, "{} accidental at {accid_x}", note.id);
            }
        }
    }
}

#[test]
fn located_chord_tones_still_get_accidentals() {
    // The lower pitch is pinned above the higher one
    let report = layout(
        r#"<chord dur="4">
             <note xml:id="c4" pname="c" oct="4" accid="s" loc="1"/>
             <note xml:id="e4" pname="e" oct="4" accid="f" loc="0"/>
           </chord>"#,
    );
    let chord = &report.chords[0];
    assert_eq!(chord.notes.len(), 2);
    for note in &chord.notes {
        let accid_x = note.accid_x.expect("accidental placed");
        assert!(accid_x < note.x, "{} accidental at {accid_x}", note.id);
    }
    assert_ne!(chord.notes[0].accid_x, chord.notes[1].accid_x);
}

// ─── Beams ──────────────────────────────────────────────────────────

#[test]
fn flat_beam_goes_below_high_notes() {
    let report = layout(
        r#"<beam xml:id="b1">
             <note pname="c" oct="5" dur="8"/>
             <note pname="c" oct="5" dur="8"/>
             <note pname="c" oct="5" dur="8"/>
             <note pname="c" oct="5" dur="8"/>
           </beam>"#,
    );
    assert_eq!(report.beams.len(), 1);
    let beam = &report.beams[0];
    assert_eq!(beam.id, "b1");
    assert_eq!(beam.place, BeamPlace::Below);
    assert!(beam.horizontal);
    assert_eq!(beam.slope, 0.0);
    assert_eq!(beam.overflow, None);
    assert_eq!(beam.members.len(), 4);
    for member in &beam.members {
        assert_eq!(member.stem_dir, StemDirection::Down);
        assert_eq!(member.y_beam, beam.starting_y);
    }
}

#[test]
fn encoded_place_wins() {
    let report = layout(
        r#"<beam place="above">
             <note pname="c" oct="5" dur="16"/>
             <note pname="d" oct="5" dur="16"/>
           </beam>"#,
    );
    let beam = &report.beams[0];
    assert_eq!(beam.place, BeamPlace::Above);
    assert!(beam.members.iter().all(|m| m.stem_dir == StemDirection::Up));
}

#[test]
fn conflicting_stem_directions_make_a_mixed_beam() {
    let report = layout(
        r#"<beam>
             <note pname="g" oct="4" dur="8" stem.dir="up"/>
             <note pname="g" oct="5" dur="8" stem.dir="down"/>
           </beam>"#,
    );
    let beam = &report.beams[0];
    assert_eq!(beam.place, BeamPlace::Mixed);
    let places: Vec<BeamPlace> = beam.members.iter().map(|m| m.place).collect();
    assert_eq!(places, vec![BeamPlace::Above, BeamPlace::Below]);
}

// ─── Tuplets ────────────────────────────────────────────────────────

#[test]
fn unbeamed_triplet_bracket_clears_the_stems() {
    let report = layout(
        r#"<tuplet xml:id="t1" num="3" numbase="2">
             <note xml:id="t1a" pname="e" oct="5" dur="4"/>
             <note pname="f" oct="5" dur="4"/>
             <note xml:id="t1c" pname="g" oct="5" dur="4"/>
           </tuplet>"#,
    );
    assert_eq!(report.tuplets.len(), 1);
    let tuplet = &report.tuplets[0];
    assert_eq!(tuplet.id, "t1");
    // All stems down, so the bracket goes below
    assert_eq!(tuplet.bracket_pos, StaffRel::Below);
    assert_eq!(tuplet.num_pos, StaffRel::Below);
    assert_eq!(tuplet.left.as_deref(), Some("t1a"));
    assert_eq!(tuplet.right.as_deref(), Some("t1c"));
    assert!(tuplet.num_in_bracket);

    // Lowest stem end at the bottom line (-720), plus a double unit
    let bracket = tuplet.bracket.as_ref().expect("bracket created");
    assert_eq!(bracket.y_rel, -900);
    let num = tuplet.num.as_ref().expect("num created");
    assert_eq!(num.y_rel, bracket.y_rel);
}

#[test]
fn tuplet_num_head_option_flips_the_bracket() {
    let xml = single_layer(
        r#"<tuplet num="3" numbase="2">
             <note pname="e" oct="5" dur="4"/>
             <note pname="f" oct="5" dur="4"/>
             <note pname="g" oct="5" dur="4"/>
           </tuplet>"#,
    );
    let options = LayoutOptions::from_json(r#"{ "tuplet_num_head": true }"#).unwrap();
    let report = layout_mei(&xml, &options).unwrap();
    assert_eq!(report.tuplets[0].bracket_pos, StaffRel::Above);
}

#[test]
fn beamed_tuplet_has_no_bracket() {
    let report = layout(
        r#"<tuplet num="3" numbase="2">
             <beam xml:id="tb">
               <note pname="e" oct="5" dur="8"/>
               <note pname="f" oct="5" dur="8"/>
               <note pname="g" oct="5" dur="8"/>
             </beam>
           </tuplet>"#,
    );
    let tuplet = &report.tuplets[0];
    assert_eq!(tuplet.bracket, None);
    assert!(tuplet.num.is_some());
    assert_eq!(report.beams[0].place, BeamPlace::Below);
    assert_eq!(tuplet.num_pos, StaffRel::Below);
    assert_eq!(tuplet.num_aligned_beam.as_deref(), Some("tb"));
}

#[test]
fn layout_is_repeatable() {
    let xml = single_layer(
        r#"<beam><note pname="a" oct="4" dur="8"/><note pname="e" oct="5" dur="8"/></beam>
           <chord dur="4"><note pname="c" oct="5"/><note pname="d" oct="5"/></chord>"#,
    );
    let options = LayoutOptions::default();
    assert_eq!(layout_mei(&xml, &options).unwrap(), layout_mei(&xml, &options).unwrap());
}
