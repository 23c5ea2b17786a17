use std::fs;
use std::path::Path;

use anyhow::bail;
use log::{debug, info, warn};
use pest::{iterators::Pair, Parser};
use pest_derive::Parser;

use crate::evol_model::{EvolModel, SiteEstimate, SiteResults};
use crate::Result;

#[derive(Parser)]
#[grammar = "./paml/codeml.pest"]
struct CodemlParser;

/// Parses the main output file of a codeml run into `model`.
///
/// Fills in the log-likelihood, the number of free parameters, the branch lengths and the
/// remaining parameter estimates of the `lnL` block, named estimates such as `kappa` or
/// `omega`, and the dN/dS table when codeml writes one. Branch values are keyed by the codeml
/// id of the node below the branch. Fails if the file has no `lnL` line.
pub fn parse_codeml_out(path: &Path, model: &mut EvolModel) -> Result<()> {
    info!("Reading codeml output for model {} from {}", model.name, path.display());
    let content = fs::read_to_string(path)?;
    parse_codeml_out_str(&content, model)?;
    info!("Finished reading codeml output successfully");
    Ok(())
}

#[derive(Debug, PartialEq)]
enum OutSection {
    Header,
    AfterLnl,
    BranchValues(Vec<(usize, usize)>),
    DnDsTable,
}

pub(crate) fn parse_codeml_out_str(content: &str, model: &mut EvolModel) -> Result<()> {
    let mut section = OutSection::Header;
    let mut found_lnl = false;
    for line in content.lines().map(str::trim) {
        section = match section {
            OutSection::AfterLnl if line.is_empty() => OutSection::AfterLnl,
            OutSection::AfterLnl => match CodemlParser::parse(Rule::branch_labels, line) {
                Ok(mut pairs) => OutSection::BranchValues(read_branch_labels(pair_of(&mut pairs)?)),
                Err(_) => OutSection::Header,
            },
            OutSection::BranchValues(branches) => {
                if let Ok(mut pairs) = CodemlParser::parse(Rule::values, line) {
                    read_lnl_values(pair_of(&mut pairs)?, &branches, model);
                }
                OutSection::Header
            }
            OutSection::DnDsTable if line.is_empty() => OutSection::DnDsTable,
            OutSection::DnDsTable => match CodemlParser::parse(Rule::branch_row, line) {
                Ok(mut pairs) => {
                    read_branch_row(pair_of(&mut pairs)?, model);
                    OutSection::DnDsTable
                }
                Err(_) => OutSection::Header,
            },
            OutSection::Header => OutSection::Header,
        };
        if section != OutSection::Header {
            continue;
        }

        if line.starts_with("lnL") {
            if found_lnl {
                warn!("Found more than one lnL line, keeping the first one.");
                continue;
            }
            match CodemlParser::parse(Rule::lnl_line, line) {
                Ok(mut pairs) => {
                    read_lnl_line(pair_of(&mut pairs)?, model)?;
                    found_lnl = true;
                    section = OutSection::AfterLnl;
                }
                Err(e) => bail!("Malformed lnL line in codeml output: {}", e),
            }
        } else if line.starts_with("branch") && line.contains("dN/dS") {
            section = OutSection::DnDsTable;
        } else if line.contains('=') {
            if let Ok(mut pairs) = CodemlParser::parse(Rule::named_values, line) {
                read_named_values(pair_of(&mut pairs)?, model);
            }
        }
    }
    if !found_lnl {
        bail!("No lnL found in codeml output for model {}", model.name);
    }
    debug!("Parsed model {}: lnL {:?}, np {:?}", model.name, model.lnl, model.np);
    Ok(())
}

/// Parses the per-site results (`rst` file) of a site model run.
pub fn parse_rst(path: &Path) -> Result<SiteResults> {
    info!("Reading site results from {}", path.display());
    let content = fs::read_to_string(path)?;
    let sites = parse_rst_str(&content)?;
    info!(
        "Read {} NEB and {} BEB site estimates",
        sites.neb.len(),
        sites.beb.len()
    );
    Ok(sites)
}

#[derive(Clone, Copy)]
enum RstSection {
    Other,
    Neb,
    Beb,
}

pub(crate) fn parse_rst_str(content: &str) -> Result<SiteResults> {
    let mut sites = SiteResults::default();
    let mut section = RstSection::Other;
    for line in content.lines().map(str::trim) {
        if line.contains("Naive Empirical Bayes (NEB)") {
            section = RstSection::Neb;
            continue;
        }
        if line.contains("Bayes Empirical Bayes (BEB)") {
            section = RstSection::Beb;
            continue;
        }
        if line.starts_with("Positively selected sites") {
            section = RstSection::Other;
            continue;
        }
        let target = match section {
            RstSection::Other => continue,
            RstSection::Neb => &mut sites.neb,
            RstSection::Beb => &mut sites.beb,
        };
        if let Ok(mut pairs) = CodemlParser::parse(Rule::site_row, line) {
            target.push(read_site_row(pair_of(&mut pairs)?)?);
        }
    }
    Ok(sites)
}

fn pair_of<'a>(pairs: &mut pest::iterators::Pairs<'a, Rule>) -> Result<Pair<'a, Rule>> {
    match pairs.next() {
        Some(pair) => Ok(pair),
        None => bail!("Empty match in codeml output"),
    }
}

fn as_usize(pair: Pair<Rule>) -> usize {
    pair.as_str().parse().unwrap_or_default()
}

fn as_f64(pair: Pair<Rule>) -> f64 {
    pair.as_str().parse().unwrap_or(f64::NAN)
}

fn read_lnl_line(rule: Pair<Rule>, model: &mut EvolModel) -> Result<()> {
    let mut inner = rule.into_inner().filter(|p| p.as_rule() != Rule::EOI);
    let (Some(_ntime), Some(np), Some(lnl)) = (inner.next(), inner.next(), inner.next()) else {
        bail!("Incomplete lnL line in codeml output");
    };
    model.np = Some(as_usize(np));
    model.lnl = Some(as_f64(lnl));
    Ok(())
}

fn read_branch(rule: Pair<Rule>) -> (usize, usize) {
    let mut ends = rule.into_inner().map(as_usize);
    (ends.next().unwrap_or_default(), ends.next().unwrap_or_default())
}

fn read_branch_labels(rule: Pair<Rule>) -> Vec<(usize, usize)> {
    rule.into_inner()
        .filter(|p| p.as_rule() == Rule::branch)
        .map(read_branch)
        .collect()
}

fn read_lnl_values(rule: Pair<Rule>, branches: &[(usize, usize)], model: &mut EvolModel) {
    let values: Vec<f64> = rule
        .into_inner()
        .filter(|p| p.as_rule() == Rule::number)
        .map(as_f64)
        .collect();
    if values.len() < branches.len() {
        warn!(
            "Expected at least {} branch lengths in codeml output, found {}",
            branches.len(),
            values.len()
        );
    }
    for ((_, child), value) in branches.iter().zip(values.iter()) {
        model.branch_mut(*child).bl = Some(*value);
    }
    model.estimates = values.iter().skip(branches.len()).copied().collect();
}

fn read_branch_row(rule: Pair<Rule>, model: &mut EvolModel) {
    let mut inner = rule.into_inner();
    let (_, child) = match inner.next() {
        Some(branch) => read_branch(branch),
        None => return,
    };
    let values: Vec<f64> = inner
        .filter(|p| p.as_rule() == Rule::number)
        .map(as_f64)
        .collect();
    // t N S dN/dS dN dS [N*dN S*dS]
    if values.len() < 6 {
        warn!("Skipping short row in dN/dS table for branch to node {}", child);
        return;
    }
    let branch = model.branch_mut(child);
    // the lnL block carries more digits than the table
    if branch.bl.is_none() {
        branch.bl = Some(values[0]);
    }
    branch.w = Some(values[3]);
    branch.dn = Some(values[4]);
    branch.ds = Some(values[5]);
}

fn read_named_values(rule: Pair<Rule>, model: &mut EvolModel) {
    for named_value in rule.into_inner().filter(|p| p.as_rule() == Rule::named_value) {
        let mut inner = named_value.into_inner();
        if let (Some(name), Some(value)) = (inner.next(), inner.next()) {
            model
                .params
                .insert(name.as_str().to_string(), as_f64(value));
        }
    }
}

fn read_site_row(rule: Pair<Rule>) -> Result<SiteEstimate> {
    let mut site = None;
    let mut residue = None;
    let mut probs = Vec::new();
    let mut class = None;
    let mut after_class = Vec::new();
    for pair in rule.into_inner() {
        match pair.as_rule() {
            Rule::integer => site = Some(as_usize(pair)),
            Rule::residue => residue = pair.as_str().chars().next(),
            Rule::number if class.is_none() => probs.push(as_f64(pair)),
            Rule::number => after_class.push(as_f64(pair)),
            Rule::class => class = pair.into_inner().next().map(as_usize),
            _ => {}
        }
    }
    let (Some(site), Some(residue), Some(class)) = (site, residue, class) else {
        bail!("Incomplete site row in codeml site results");
    };
    Ok(SiteEstimate {
        site,
        residue,
        probs,
        class,
        w: after_class.first().copied(),
        se: after_class.get(1).copied(),
    })
}
