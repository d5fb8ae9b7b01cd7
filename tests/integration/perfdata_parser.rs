//! Spool lines through the parser, as emitted by Nagios/Icinga/Naemon
//!
//! The cases below are real world perfdata that broke earlier parsers.

use std::collections::HashMap;

use nagflow::{
    perfdata::{PerformanceSample, parse_record},
    record::RawRecord,
    routing::RoutingFilter,
};
use pretty_assertions::assert_eq;

const COMMAND: &str = "check_ranges!-w 3: -c 4: -g :46 -l :48 SERVICESTATE::0";

fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn sample(
    (host, service, command): (&str, &str, &str),
    time: &str,
    label: &str,
    unit: &str,
    tags: &[(&str, &str)],
    fields: &[(&str, &str)],
) -> PerformanceSample {
    PerformanceSample {
        host: host.to_string(),
        service: service.to_string(),
        command: command.to_string(),
        time: time.to_string(),
        label: label.to_string(),
        unit: unit.to_string(),
        tags: map(tags),
        fields: map(fields),
        routing: RoutingFilter::all(),
    }
}

const RANGE: (&str, &str, &str) = ("xxx", "range", "check_ranges");

fn range_line(timet: &str, perfdata: &str) -> String {
    format!(
        "DATATYPE::SERVICEPERFDATA\tTIMET::{timet}\tHOSTNAME::xxx\tSERVICEDESC::range\tSERVICEPERFDATA::{perfdata}\tSERVICECHECKCOMMAND::{COMMAND}\tSERVICESTATETYPE::1"
    )
}

fn parse(line: &str) -> Vec<PerformanceSample> {
    let record = RawRecord::from_spool_line(line);
    parse_record(&record, &RoutingFilter::all(), None).collect()
}

const NO_FILL: &[(&str, &str)] = &[("warn-fill", "none"), ("crit-fill", "none")];

#[test]
fn test_single_value() {
    assert_eq!(
        parse(&range_line("1441791000", "a used=4")),
        vec![sample(RANGE, "1441791000000", "a used", "", &[], &[("value", "4.0")])]
    );
}

#[test]
fn test_quoted_label_with_unit_and_thresholds() {
    assert_eq!(
        parse(&range_line("1441791000", r"a used=4 'C:\ used %'=44%;89;94;0;100")),
        vec![
            sample(RANGE, "1441791000000", "a used", "", &[], &[("value", "4.0")]),
            sample(
                RANGE,
                "1441791000000",
                r"'C:\ used %'",
                "%",
                NO_FILL,
                &[
                    ("value", "44.0"),
                    ("warn", "89.0"),
                    ("crit", "94.0"),
                    ("min", "0.0"),
                    ("max", "100.0"),
                ],
            ),
        ]
    );
}

#[test]
fn test_warn_and_crit_only() {
    assert_eq!(
        parse(&range_line("1441791001", "a used=4;2;10")),
        vec![sample(
            RANGE,
            "1441791001000",
            "a used",
            "",
            NO_FILL,
            &[("value", "4.0"), ("warn", "2.0"), ("crit", "10.0")],
        )]
    );
}

#[test]
fn test_all_segments() {
    assert_eq!(
        parse(&range_line("1441791002", "a used=4;2;10;1;4")),
        vec![sample(
            RANGE,
            "1441791002000",
            "a used",
            "",
            NO_FILL,
            &[
                ("value", "4.0"),
                ("warn", "2.0"),
                ("crit", "10.0"),
                ("min", "1.0"),
                ("max", "4.0"),
            ],
        )]
    );
}

#[test]
fn test_outer_ranges() {
    assert_eq!(
        parse(&range_line("1441791003", "a used=4;2:4;8:10;1;4")),
        vec![sample(
            RANGE,
            "1441791003000",
            "a used",
            "",
            &[("warn-fill", "outer"), ("crit-fill", "outer")],
            &[
                ("value", "4.0"),
                ("warn-min", "2.0"),
                ("warn-max", "4.0"),
                ("crit-min", "8.0"),
                ("crit-max", "10.0"),
                ("min", "1.0"),
                ("max", "4.0"),
            ],
        )]
    );
}

#[test]
fn test_inner_ranges() {
    assert_eq!(
        parse(&range_line("1441791004", "a used=4;@2:4;@8:10;1;4")),
        vec![sample(
            RANGE,
            "1441791004000",
            "a used",
            "",
            &[("warn-fill", "inner"), ("crit-fill", "inner")],
            &[
                ("value", "4.0"),
                ("warn-min", "2.0"),
                ("warn-max", "4.0"),
                ("crit-min", "8.0"),
                ("crit-max", "10.0"),
                ("min", "1.0"),
                ("max", "4.0"),
            ],
        )]
    );
}

#[test]
fn test_one_sided_ranges_collapse_to_plain_thresholds() {
    let expected = |time: &str| {
        vec![sample(
            RANGE,
            time,
            "a used",
            "",
            NO_FILL,
            &[
                ("value", "4.0"),
                ("warn", "2.0"),
                ("crit", "10.0"),
                ("min", "1.0"),
                ("max", "4.0"),
            ],
        )]
    };

    assert_eq!(
        parse(&range_line("1441791005", "a used=4;2:;10:;1;4")),
        expected("1441791005000")
    );
    assert_eq!(
        parse(&range_line("1441791006", "a used=4;:2;:10;1;4")),
        expected("1441791006000")
    );
    assert_eq!(
        parse(&range_line("1441791007", "a used=4;~:2;10:~;1;4")),
        expected("1441791007000")
    );
}

#[test]
fn test_decimal_separators() {
    assert_eq!(
        parse(&range_line("1441791000", "a used=4.5")),
        vec![sample(RANGE, "1441791000000", "a used", "", &[], &[("value", "4.5")])]
    );
    assert_eq!(
        parse(&range_line("1441791000", "comma=4,5")),
        vec![sample(RANGE, "1441791000000", "comma", "", &[], &[("value", "4.5")])]
    );
    assert_eq!(
        parse(&range_line(
            "1441791000",
            r"a used=4,6 'C:\ used %'=44,1%;89,2;94,3;0,4;100,5"
        )),
        vec![
            sample(RANGE, "1441791000000", "a used", "", &[], &[("value", "4.6")]),
            sample(
                RANGE,
                "1441791000000",
                r"'C:\ used %'",
                "%",
                NO_FILL,
                &[
                    ("value", "44.1"),
                    ("warn", "89.2"),
                    ("crit", "94.3"),
                    ("min", "0.4"),
                    ("max", "100.5"),
                ],
            ),
        ]
    );
}

fn directive_line(directive: &str) -> String {
    format!(
        "DATATYPE::SERVICEPERFDATA\tTIMET::1441791000\t{directive}\tHOSTNAME::xxx\tSERVICEDESC::range\tSERVICEPERFDATA::tag=4.5\tSERVICECHECKCOMMAND::{COMMAND}\tSERVICESTATETYPE::1"
    )
}

#[test]
fn test_tag_directive() {
    assert_eq!(
        parse(&directive_line("NAGFLUX:TAG::foo=bar")),
        vec![sample(RANGE, "1441791000000", "tag", "", &[("foo", "bar")], &[("value", "4.5")])]
    );
}

#[test]
fn test_empty_and_unresolved_tag_directives_are_ignored() {
    let expected = vec![sample(RANGE, "1441791000000", "tag", "", &[], &[("value", "4.5")])];
    assert_eq!(parse(&directive_line("NAGFLUX:TAG::")), expected);
    assert_eq!(parse(&directive_line("NAGFLUX:TAG::$_SERVICENAGFLUX_TAG$")), expected);
}

#[test]
fn test_target_directive_sets_routing() {
    let mut expected = sample(RANGE, "1441791000000", "tag", "", &[], &[("value", "4.5")]);
    expected.routing = RoutingFilter::new("foo");
    assert_eq!(parse(&directive_line("NAGFLUX:TARGET::foo")), vec![expected]);
}

#[test]
fn test_field_directive_adds_fields() {
    let samples = parse(&directive_line("NAGFLUX:FIELD::state=2 $SERVICESTATEID$"));
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].fields, map(&[("value", "4.5"), ("state", "2")]));
}

#[test]
fn test_comma_decimals_with_empty_segments() {
    let line = "DATATYPE::SERVICEPERFDATA\tTIMET::1489572014\tHOSTNAME::HOST_SERVER\tSERVICEDESC::web\tSERVICEPERFDATA::time=0,004118s;;;0,000000 size=128766B;;;0\tSERVICECHECKCOMMAND::check_http!HOST_SERVER!80!/!20\tHOSTSTATE::UP\tHOSTSTATETYPE::HARD SERVICESTATE::OK\tSERVICESTATETYPE::HARD\tSERVICEOUTPUT::HTTP OK: HTTP/1.1 200 OK - 128766 bytes in 0,004 second response time";
    let web = ("HOST_SERVER", "web", "check_http");

    assert_eq!(
        parse(line),
        vec![
            sample(
                web,
                "1489572014000",
                "time",
                "s",
                &[],
                &[("value", "0.004118"), ("min", "0.000000")],
            ),
            sample(
                web,
                "1489572014000",
                "size",
                "B",
                &[],
                &[("value", "128766.0"), ("min", "0.0")],
            ),
        ]
    );
}

#[test]
fn test_non_ascii_units_and_names() {
    let line = "DATATYPE::SERVICEPERFDATA\tTIMET::1490957788\tHOSTNAME::müü\tSERVICEDESC::möö\tSERVICEPERFDATA::getItinerary_min=34385µs getItinerary_avg=130925µs getItinerary_max=267719µs\tSERVICECHECKCOMMAND::check_perfs\tSERVICESTATE::0\tSERVICESTATETYPE::1";
    let perfs = ("müü", "möö", "check_perfs");

    assert_eq!(
        parse(line),
        vec![
            sample(perfs, "1490957788000", "getItinerary_min", "µs", &[], &[("value", "34385.0")]),
            sample(perfs, "1490957788000", "getItinerary_avg", "µs", &[], &[("value", "130925.0")]),
            sample(perfs, "1490957788000", "getItinerary_max", "µs", &[], &[("value", "267719.0")]),
        ]
    );
}

#[test]
fn test_space_in_service_and_label() {
    let line = "DATATYPE::SERVICEPERFDATA\tTIMET::1490957788\tHOSTNAME::test\tSERVICEDESC::test space\tSERVICEPERFDATA::'test rss'=35512320B;;;0;\tSERVICECHECKCOMMAND::check_test\tSERVICESTATE::0\tSERVICESTATETYPE::1";

    assert_eq!(
        parse(line),
        vec![sample(
            ("test", "test space", "check_test"),
            "1490957788000",
            "'test rss'",
            "B",
            &[],
            &[("value", "35512320.0"), ("min", "0.0")],
        )]
    );
}

#[test]
fn test_bracketed_plugin_errors_are_dropped() {
    let line = "DATATYPE::SERVICEPERFDATA\tTIMET::1490957788\tHOSTNAME::test\tSERVICEDESC::test\tSERVICEPERFDATA::sessions=10% [si signo=11] 'valid[1]'=5 [si_errno=0] [si_code=1]\tSERVICECHECKCOMMAND::check_test\tSERVICESTATE::0\tSERVICESTATETYPE::1";
    let test = ("test", "test", "check_test");

    assert_eq!(
        parse(line),
        vec![
            sample(test, "1490957788000", "sessions", "%", &[], &[("value", "10.0")]),
            sample(test, "1490957788000", "'valid[1]'", "", &[], &[("value", "5.0")]),
        ]
    );
}

#[test]
fn test_unknown_values_are_skipped() {
    let samples = parse(&range_line("1441791000", "a=U b=1"));
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].label, "b");
}
