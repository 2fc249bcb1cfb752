//! Built-in function table for the formula bytecode.
//!
//! Fixed-arity functions are encoded with the FUNCTION token (the argument
//! count is implied by the function id); variable-arity functions use the
//! FUNCTIONVARARG token, which carries an explicit argument count. Function
//! id 0x00FF is the ATTRIBUTE sentinel: it marks the branch token of the
//! irregular IF construct and, for add-in calls, a call whose first operand
//! names the function.

/// Function id reserved for the IF-construct branch token / add-in calls.
pub(crate) const FUNCTION_ATTRIBUTE: u16 = 0x00FF;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Arity {
    Fixed(u8),
    Variable,
}

#[derive(Copy, Clone, Debug)]
pub struct FunctionSpec {
    pub id: u16,
    pub name: &'static str,
    pub arity: Arity,
}

const fn fixed(id: u16, name: &'static str, argc: u8) -> FunctionSpec {
    FunctionSpec {
        id,
        name,
        arity: Arity::Fixed(argc),
    }
}

const fn var(id: u16, name: &'static str) -> FunctionSpec {
    FunctionSpec {
        id,
        name,
        arity: Arity::Variable,
    }
}

/// The function table, sorted by id.
static FUNCTIONS: &[FunctionSpec] = &[
    var(0, "COUNT"),
    var(1, "IF"),
    fixed(2, "ISNA", 1),
    fixed(3, "ISERROR", 1),
    var(4, "SUM"),
    var(5, "AVERAGE"),
    var(6, "MIN"),
    var(7, "MAX"),
    var(8, "ROW"),
    var(9, "COLUMN"),
    fixed(10, "NA", 0),
    var(11, "NPV"),
    var(12, "STDEV"),
    var(13, "DOLLAR"),
    var(14, "FIXED"),
    fixed(15, "SIN", 1),
    fixed(16, "COS", 1),
    fixed(17, "TAN", 1),
    fixed(18, "ATAN", 1),
    fixed(19, "PI", 0),
    fixed(20, "SQRT", 1),
    fixed(21, "EXP", 1),
    fixed(22, "LN", 1),
    fixed(23, "LOG10", 1),
    fixed(24, "ABS", 1),
    fixed(25, "INT", 1),
    fixed(26, "SIGN", 1),
    fixed(27, "ROUND", 2),
    var(28, "LOOKUP"),
    var(29, "INDEX"),
    fixed(30, "REPT", 2),
    fixed(31, "MID", 3),
    fixed(32, "LEN", 1),
    fixed(33, "VALUE", 1),
    fixed(34, "TRUE", 0),
    fixed(35, "FALSE", 0),
    var(36, "AND"),
    var(37, "OR"),
    fixed(38, "NOT", 1),
    fixed(39, "MOD", 2),
    fixed(40, "DCOUNT", 3),
    fixed(41, "DSUM", 3),
    fixed(42, "DAVERAGE", 3),
    fixed(43, "DMIN", 3),
    fixed(44, "DMAX", 3),
    fixed(45, "DSTDEV", 3),
    var(46, "VAR"),
    fixed(47, "DVAR", 3),
    fixed(48, "TEXT", 2),
    var(49, "LINEST"),
    var(50, "TREND"),
    var(51, "LOGEST"),
    var(52, "GROWTH"),
    var(56, "PV"),
    var(57, "FV"),
    var(58, "NPER"),
    var(59, "PMT"),
    var(60, "RATE"),
    fixed(61, "MIRR", 3),
    var(62, "IRR"),
    fixed(63, "RAND", 0),
    var(64, "MATCH"),
    fixed(65, "DATE", 3),
    fixed(66, "TIME", 3),
    fixed(67, "DAY", 1),
    fixed(68, "MONTH", 1),
    fixed(69, "YEAR", 1),
    var(70, "WEEKDAY"),
    fixed(71, "HOUR", 1),
    fixed(72, "MINUTE", 1),
    fixed(73, "SECOND", 1),
    fixed(74, "NOW", 0),
    fixed(75, "AREAS", 1),
    fixed(76, "ROWS", 1),
    fixed(77, "COLUMNS", 1),
    var(78, "OFFSET"),
    var(82, "SEARCH"),
    fixed(83, "TRANSPOSE", 1),
    fixed(86, "TYPE", 1),
    fixed(97, "ATAN2", 2),
    fixed(98, "ASIN", 1),
    fixed(99, "ACOS", 1),
    var(100, "CHOOSE"),
    var(101, "HLOOKUP"),
    var(102, "VLOOKUP"),
    fixed(105, "ISREF", 1),
    var(109, "LOG"),
    fixed(111, "CHAR", 1),
    fixed(112, "LOWER", 1),
    fixed(113, "UPPER", 1),
    fixed(114, "PROPER", 1),
    var(115, "LEFT"),
    var(116, "RIGHT"),
    fixed(117, "EXACT", 2),
    fixed(118, "TRIM", 1),
    fixed(119, "REPLACE", 4),
    var(120, "SUBSTITUTE"),
    fixed(121, "CODE", 1),
    var(124, "FIND"),
    var(125, "CELL"),
    fixed(126, "ISERR", 1),
    fixed(127, "ISTEXT", 1),
    fixed(128, "ISNUMBER", 1),
    fixed(129, "ISBLANK", 1),
    fixed(130, "T", 1),
    fixed(131, "N", 1),
    fixed(140, "DATEVALUE", 1),
    fixed(141, "TIMEVALUE", 1),
    fixed(142, "SLN", 3),
    fixed(143, "SYD", 4),
    var(144, "DDB"),
    var(148, "INDIRECT"),
    fixed(162, "CLEAN", 1),
    fixed(163, "MDETERM", 1),
    fixed(164, "MINVERSE", 1),
    fixed(165, "MMULT", 2),
    var(167, "IPMT"),
    var(168, "PPMT"),
    var(169, "COUNTA"),
    var(183, "PRODUCT"),
    fixed(184, "FACT", 1),
    fixed(189, "DPRODUCT", 3),
    fixed(190, "ISNONTEXT", 1),
    var(193, "STDEVP"),
    var(194, "VARP"),
    fixed(195, "DSTDEVP", 3),
    fixed(196, "DVARP", 3),
    var(197, "TRUNC"),
    fixed(198, "ISLOGICAL", 1),
    fixed(199, "DCOUNTA", 3),
    var(212, "ROUNDUP"),
    var(213, "ROUNDDOWN"),
    var(216, "RANK"),
    var(219, "ADDRESS"),
    var(220, "DAYS360"),
    fixed(221, "TODAY", 0),
    var(222, "VDB"),
    var(227, "MEDIAN"),
    var(228, "SUMPRODUCT"),
    fixed(229, "SINH", 1),
    fixed(230, "COSH", 1),
    fixed(231, "TANH", 1),
    fixed(232, "ASINH", 1),
    fixed(233, "ACOSH", 1),
    fixed(234, "ATANH", 1),
    fixed(235, "DGET", 3),
    var(247, "DB"),
    fixed(252, "FREQUENCY", 2),
    fixed(261, "ERROR.TYPE", 1),
    var(269, "AVEDEV"),
    fixed(271, "GAMMALN", 1),
    fixed(273, "BINOMDIST", 4),
    fixed(274, "CHIDIST", 2),
    fixed(275, "CHIINV", 2),
    fixed(276, "COMBIN", 2),
    fixed(277, "CONFIDENCE", 3),
    fixed(278, "CRITBINOM", 3),
    fixed(279, "EVEN", 1),
    fixed(280, "EXPONDIST", 3),
    fixed(281, "FDIST", 3),
    fixed(282, "FINV", 3),
    fixed(283, "FISHER", 1),
    fixed(284, "FISHERINV", 1),
    fixed(285, "FLOOR", 2),
    fixed(288, "CEILING", 2),
    fixed(294, "NORMSDIST", 1),
    fixed(295, "NORMINV", 3),
    fixed(296, "NORMSINV", 1),
    fixed(297, "STANDARDIZE", 3),
    fixed(298, "ODD", 1),
    fixed(299, "PERMUT", 2),
    fixed(300, "POISSON", 3),
    fixed(301, "TDIST", 3),
    fixed(302, "WEIBULL", 4),
    fixed(303, "SUMXMY2", 2),
    fixed(304, "SUMX2MY2", 2),
    fixed(305, "SUMX2PY2", 2),
    fixed(306, "CHITEST", 2),
    fixed(307, "CORREL", 2),
    fixed(308, "COVAR", 2),
    fixed(309, "FORECAST", 3),
    fixed(310, "FTEST", 2),
    fixed(311, "INTERCEPT", 2),
    fixed(312, "PEARSON", 2),
    fixed(313, "RSQ", 2),
    fixed(314, "STEYX", 2),
    fixed(315, "SLOPE", 2),
    fixed(316, "TTEST", 4),
    var(317, "PROB"),
    var(318, "DEVSQ"),
    var(319, "GEOMEAN"),
    var(320, "HARMEAN"),
    var(321, "SUMSQ"),
    var(322, "KURT"),
    var(323, "SKEW"),
    var(324, "ZTEST"),
    fixed(325, "LARGE", 2),
    fixed(326, "SMALL", 2),
    fixed(327, "QUARTILE", 2),
    fixed(328, "PERCENTILE", 2),
    var(329, "PERCENTRANK"),
    var(330, "MODE"),
    fixed(331, "TRIMMEAN", 2),
    fixed(332, "TINV", 2),
    var(336, "CONCATENATE"),
    fixed(337, "POWER", 2),
    fixed(342, "RADIANS", 1),
    fixed(343, "DEGREES", 1),
    var(344, "SUBTOTAL"),
    var(345, "SUMIF"),
    fixed(346, "COUNTIF", 2),
    fixed(347, "COUNTBLANK", 1),
    fixed(350, "ISPMT", 4),
    var(354, "ROMAN"),
    var(358, "GETPIVOTDATA"),
    var(359, "HYPERLINK"),
    fixed(360, "PHONETIC", 1),
    var(361, "AVERAGEA"),
    var(362, "MAXA"),
    var(363, "MINA"),
    var(364, "STDEVPA"),
    var(365, "VARPA"),
    var(366, "STDEVA"),
    var(367, "VARA"),
];

pub(crate) fn function_spec(id: u16) -> Option<&'static FunctionSpec> {
    FUNCTIONS
        .binary_search_by_key(&id, |spec| spec.id)
        .ok()
        .map(|idx| &FUNCTIONS[idx])
}

pub(crate) fn function_name(id: u16) -> Option<&'static str> {
    function_spec(id).map(|spec| spec.name)
}

/// Argument count for a fixed-arity function, `None` for variable-arity or
/// unknown ids.
pub(crate) fn fixed_arity(id: u16) -> Option<u8> {
    match function_spec(id)?.arity {
        Arity::Fixed(argc) => Some(argc),
        Arity::Variable => None,
    }
}
