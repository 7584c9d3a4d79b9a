use chrono::NaiveDate;
use liters_geo::{
    Atlas, DateRange, HierarchyBearing, Kind, NewContract, NewNode, NewPlan, NewReport, NewStory,
    NewTechnology, NodeRef, NodeUpdate, TechnologyScale,
};
use std::collections::BTreeSet;

struct Rwanda {
    atlas: Atlas,
    rwanda: NodeRef,
    kigali: NodeRef,
    nyarugenge: NodeRef,
    muhima: NodeRef,
    kiyovu: NodeRef,
    ubumwe: NodeRef,
    clinic: NodeRef,
    tech: u64,
}

fn day(month: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, month, d).unwrap()
}

fn rwanda() -> Rwanda {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut atlas = Atlas::memory().unwrap();
    let rwanda = atlas
        .create_node(NewNode::new(Kind::Country, "Rwanda").gis_code("01"))
        .unwrap();
    let kigali = atlas
        .create_node(
            NewNode::new(Kind::District, "Kigali")
                .gis_code("0101")
                .parent(rwanda.id),
        )
        .unwrap();
    let nyarugenge = atlas
        .create_node(
            NewNode::new(Kind::Sector, "Nyarugenge")
                .gis_code("010101")
                .parent(kigali.id),
        )
        .unwrap();
    let muhima = atlas
        .create_node(
            NewNode::new(Kind::Sector, "Muhima")
                .gis_code("010102")
                .parent(kigali.id),
        )
        .unwrap();
    let kiyovu = atlas
        .create_node(NewNode::new(Kind::Cell, "Kiyovu").parent(nyarugenge.id))
        .unwrap();
    let ubumwe = atlas
        .create_node(NewNode::new(Kind::Village, "Ubumwe").parent(kiyovu.id))
        .unwrap();
    let clinic = atlas
        .create_node(NewNode::new(Kind::Facility, "Kiyovu clinic").parent(ubumwe.id))
        .unwrap();
    let tech = atlas
        .create_technology(NewTechnology::new("SAM3", TechnologyScale::Family))
        .unwrap();

    Rwanda {
        atlas,
        rwanda,
        kigali,
        nyarugenge,
        muhima,
        kiyovu,
        ubumwe,
        clinic,
        tech,
    }
}

#[test]
fn test_report_on_cell_rolls_up_to_every_ancestor() {
    let mut w = rwanda();
    let report = w
        .atlas
        .create_report(NewReport::new(day(3, 1), w.tech, w.kiyovu).distributed(4))
        .unwrap();

    for node in [w.kiyovu, w.nyarugenge, w.kigali, w.rwanda] {
        let ids = w.atlas.related_reports(node).unwrap().ids(w.atlas.store());
        assert_eq!(ids, BTreeSet::from([report]), "under {}", node);
    }
    let unrelated = w.atlas.related_reports(w.muhima).unwrap();
    assert_eq!(unrelated.count(w.atlas.store()), 0);
}

#[test]
fn test_sibling_subtrees_have_disjoint_reports() {
    let mut w = rwanda();
    let rugenge = w
        .atlas
        .create_node(NewNode::new(Kind::Cell, "Rugenge").parent(w.muhima.id))
        .unwrap();
    for target in [w.kiyovu, w.ubumwe, w.clinic, rugenge, w.muhima] {
        w.atlas
            .create_report(NewReport::new(day(3, 1), w.tech, target))
            .unwrap();
    }

    let store = w.atlas.store();
    let left = w.atlas.related_reports(w.nyarugenge).unwrap().ids(store);
    let right = w.atlas.related_reports(w.muhima).unwrap().ids(store);
    assert_eq!(left.len(), 3);
    assert_eq!(right.len(), 2);
    assert!(left.is_disjoint(&right));
    assert_eq!(w.atlas.related_reports(w.kigali).unwrap().count(store), 5);
}

#[test]
fn test_hierarchy_snapshot_shape() {
    let w = rwanda();
    for node in [w.rwanda, w.kigali, w.nyarugenge, w.kiyovu, w.ubumwe, w.clinic] {
        let stored = w.atlas.node(node).unwrap();
        assert_eq!(stored.hierarchy().len(), stored.depth());
        if let Some(parent) = stored.parent_ref() {
            assert_eq!(stored.hierarchy().last().unwrap().parent_id, parent.id);
        }
    }

    let clinic = w.atlas.node(w.clinic).unwrap();
    assert_eq!(
        clinic.breadcrumb(),
        "Rwanda > Kigali > Nyarugenge > Kiyovu > Ubumwe"
    );
    assert_eq!(clinic.hierarchy().last().unwrap().link, "/villages/1");
}

#[test]
fn test_reparent_cell_without_and_with_cascade() {
    let mut w = rwanda();
    let sector_of = |atlas: &Atlas, node: NodeRef| {
        atlas
            .node(node)
            .unwrap()
            .hierarchy()
            .entry_for(Kind::Sector)
            .unwrap()
            .parent_name
            .clone()
    };

    let change = w
        .atlas
        .update_node(w.kiyovu, NodeUpdate::new().parent(w.muhima.id))
        .unwrap();
    assert!(change.reparented);
    assert_eq!(sector_of(&w.atlas, w.kiyovu), "Muhima");
    assert_eq!(sector_of(&w.atlas, w.ubumwe), "Nyarugenge");

    let report = w.atlas.update_hierarchy(w.kiyovu, true).unwrap();
    assert!(report.is_clean());
    assert_eq!(sector_of(&w.atlas, w.ubumwe), "Muhima");
    assert_eq!(sector_of(&w.atlas, w.clinic), "Muhima");

    // Descendant lists follow the move.
    assert!(w.atlas.descendant_ids(w.nyarugenge, Kind::Village).is_empty());
    assert_eq!(
        w.atlas.descendant_ids(w.muhima, Kind::Village),
        vec![w.ubumwe.id]
    );
}

#[test]
fn test_cascading_update_twice_is_stable() {
    let mut w = rwanda();
    w.atlas.update_hierarchy(w.rwanda, true).unwrap();
    let before = w.atlas.node(w.clinic).unwrap().hierarchy().clone();

    let report = w.atlas.update_hierarchy(w.rwanda, true).unwrap();
    assert_eq!(report.updated, 0);
    assert_eq!(w.atlas.node(w.clinic).unwrap().hierarchy(), &before);
}

#[test]
fn test_hide_and_show_sector() {
    let mut w = rwanda();

    w.atlas.toggle_visibility(w.nyarugenge, true).unwrap();
    for node in [w.nyarugenge, w.kiyovu, w.ubumwe, w.clinic] {
        assert!(w.atlas.node(node).unwrap().hidden, "{} visible", node);
    }
    assert!(!w.atlas.node(w.kigali).unwrap().hidden);

    // Hide the ancestors too, then show the sector again.
    w.atlas.toggle_visibility(w.rwanda, true).unwrap();
    w.atlas.toggle_visibility(w.nyarugenge, false).unwrap();
    for node in [w.rwanda, w.kigali, w.nyarugenge, w.kiyovu, w.ubumwe, w.clinic] {
        assert!(!w.atlas.node(node).unwrap().hidden, "{} hidden", node);
    }
    assert!(w.atlas.node(w.muhima).unwrap().hidden);
}

#[test]
fn test_showing_one_cell_keeps_sector_hidden() {
    let mut w = rwanda();
    let rwampara = w
        .atlas
        .create_node(NewNode::new(Kind::Cell, "Rwampara").parent(w.nyarugenge.id))
        .unwrap();

    w.atlas.toggle_visibility(w.nyarugenge, true).unwrap();
    for node in [w.kiyovu, rwampara, w.ubumwe] {
        assert!(w.atlas.node(node).unwrap().hidden, "{} visible", node);
    }

    let change = w.atlas.toggle_visibility(w.kiyovu, false).unwrap();
    assert_eq!(change.ancestors, 0);
    assert!(w.atlas.node(w.nyarugenge).unwrap().hidden);
    assert!(w.atlas.node(rwampara).unwrap().hidden);
    assert!(!w.atlas.node(w.kiyovu).unwrap().hidden);
    assert!(!w.atlas.node(w.ubumwe).unwrap().hidden);

    w.atlas.toggle_visibility(w.rwanda, true).unwrap();
    w.atlas.toggle_visibility(w.nyarugenge, false).unwrap();
    for node in [w.rwanda, w.kigali, w.nyarugenge, rwampara] {
        assert!(!w.atlas.node(node).unwrap().hidden, "{} hidden", node);
    }
}

#[test]
fn test_plans_and_stories_roll_up() {
    let mut w = rwanda();
    let contract = w
        .atlas
        .create_contract(NewContract::new("2024 season", day(1, 1), day(6, 30)).goals(500, 2500))
        .unwrap();
    w.atlas
        .create_plan(NewPlan::new(contract, w.tech, w.ubumwe, 40).people_goal(200))
        .unwrap();
    w.atlas
        .create_plan(NewPlan::new(contract, w.tech, w.muhima, 60))
        .unwrap();
    let report = w
        .atlas
        .create_report(
            NewReport::new(day(2, 14), w.tech, w.clinic)
                .contract(contract)
                .distributed(15),
        )
        .unwrap();
    let story = w
        .atlas
        .create_story(NewStory::new(report, "First filters", "Handed out at the clinic"))
        .unwrap();

    let store = w.atlas.store();
    let plans = w.atlas.related_plans(w.nyarugenge).unwrap();
    assert_eq!(plans.totals(store).goal, 40);
    let all_plans = w.atlas.related_plans(w.rwanda).unwrap();
    assert_eq!(all_plans.totals(store).goal, 100);
    let late = all_plans.within(DateRange::new(day(8, 1), day(9, 1)));
    assert_eq!(late.count(store), 0);

    let stories = w.atlas.related_stories(w.kigali).unwrap();
    assert_eq!(stories.ids(store), BTreeSet::from([story]));
    let none = w.atlas.related_stories(w.muhima).unwrap();
    assert_eq!(none.count(store), 0);
}

#[test]
fn test_ancestors_at_and_of_kind() {
    let w = rwanda();
    let sectors = w
        .atlas
        .ancestors_at(&[w.clinic, w.ubumwe, w.muhima], Kind::Sector);
    assert_eq!(sectors, BTreeSet::from([w.nyarugenge.id, w.muhima.id]));

    assert_eq!(
        w.atlas.ancestor_of_kind(w.clinic, Kind::District).unwrap(),
        Some(w.kigali)
    );
    assert_eq!(
        w.atlas.ancestor_of_kind(w.kiyovu, Kind::Cell).unwrap(),
        Some(w.kiyovu)
    );
    assert_eq!(w.atlas.ancestor_of_kind(w.kigali, Kind::Cell).unwrap(), None);
}

#[test]
fn test_import_sectors_through_atlas() {
    let mut w = rwanda();
    assert_eq!(w.atlas.descendant_ids(w.kigali, Kind::Sector).len(), 2);

    let csv = "name,gis_code\nNyarugenge,010101\nGitega,010103\nKimisagara,010104\n";
    let summary = w.atlas.import_reader(Kind::Sector, csv.as_bytes()).unwrap();
    assert_eq!(summary.message(), "2 records created.");
    assert_eq!(summary.existing, 1);

    assert_eq!(w.atlas.descendant_ids(w.kigali, Kind::Sector).len(), 4);
}

#[test]
fn test_reset_hierarchies_after_snapshot_roundtrip() {
    let mut w = rwanda();
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("atlas.json");
    w.atlas.save_snapshot_to(&path).unwrap();

    let mut restored = Atlas::open(&path).unwrap();
    assert_eq!(restored.stats(), w.atlas.stats());
    let report = restored.reset_hierarchies().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.updated, 0);
}
