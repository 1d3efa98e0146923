use std::collections::HashMap;

use crate::normalize::normalize_name;

/// Similarity floor under which an LLM-suggested pair is discarded.
pub const SEMANTIC_PAIR_THRESHOLD: f64 = 0.55;

#[derive(Debug)]
pub struct Paired<'a, T> {
    pub source: &'a T,
    pub target: &'a T,
    /// True when the pair matched through normalization or the semantic
    /// layer rather than byte-equal names.
    pub renamed: bool,
    pub confidence: f64,
}

#[derive(Debug)]
pub struct PairingOutcome<'a, T> {
    pub pairs: Vec<Paired<'a, T>>,
    /// Present in source, absent in target.
    pub missing: Vec<&'a T>,
    /// Present in target, absent in source.
    pub additional: Vec<&'a T>,
}

impl<'a, T> PairingOutcome<'a, T> {
    /// paired + unpaired element count, the scoring denominator base.
    pub fn element_count(&self) -> usize {
        self.pairs.len() + self.missing.len() + self.additional.len()
    }
}

/// Layers 1 and 2 of the pairing rule: identity match on normalized names,
/// then optional signature match for the leftovers. When several targets
/// share a normalized name, the earliest in input order wins.
pub fn pair_elements<'a, T, N>(
    source: &'a [T],
    target: &'a [T],
    name_of: N,
    signature_eq: Option<&dyn Fn(&T, &T) -> bool>,
) -> PairingOutcome<'a, T>
where
    N: Fn(&T) -> String,
{
    let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, element) in target.iter().enumerate() {
        by_name
            .entry(normalize_name(&name_of(element)))
            .or_default()
            .push(index);
    }
    // Reverse so pop() yields the earliest input position.
    for indices in by_name.values_mut() {
        indices.reverse();
    }

    let mut taken = vec![false; target.len()];
    let mut pairs = Vec::new();
    let mut unmatched_source = Vec::new();

    for element in source {
        let key = normalize_name(&name_of(element));
        let candidate = by_name.get_mut(&key).and_then(|indices| indices.pop());
        match candidate {
            Some(index) => {
                taken[index] = true;
                let renamed = name_of(element) != name_of(&target[index]);
                pairs.push(Paired {
                    source: element,
                    target: &target[index],
                    renamed,
                    confidence: 1.0,
                });
            }
            None => unmatched_source.push(element),
        }
    }

    let mut missing = Vec::new();
    if let Some(signature_eq) = signature_eq {
        for element in unmatched_source {
            let found = target
                .iter()
                .enumerate()
                .find(|(index, candidate)| !taken[*index] && signature_eq(element, candidate));
            match found {
                Some((index, candidate)) => {
                    taken[index] = true;
                    pairs.push(Paired {
                        source: element,
                        target: candidate,
                        renamed: true,
                        confidence: 0.9,
                    });
                }
                None => missing.push(element),
            }
        }
    } else {
        missing = unmatched_source;
    }

    let additional = target
        .iter()
        .enumerate()
        .filter(|(index, _)| !taken[*index])
        .map(|(_, element)| element)
        .collect();

    PairingOutcome {
        pairs,
        missing,
        additional,
    }
}

/// Layer 3: fold LLM-suggested pairs into the outcome. Suggestions are
/// (source name, target name, similarity); pairs below the threshold are
/// discarded, the rest are accepted as renamed-element pairs.
pub fn apply_semantic_pairs<'a, T, N>(
    outcome: &mut PairingOutcome<'a, T>,
    suggestions: &[(String, String, f64)],
    name_of: N,
) where
    N: Fn(&T) -> String,
{
    for (source_name, target_name, similarity) in suggestions {
        if *similarity < SEMANTIC_PAIR_THRESHOLD {
            continue;
        }
        let source_pos = outcome
            .missing
            .iter()
            .position(|e| name_of(e) == *source_name);
        let target_pos = outcome
            .additional
            .iter()
            .position(|e| name_of(e) == *target_name);
        if let (Some(source_pos), Some(target_pos)) = (source_pos, target_pos) {
            let source = outcome.missing.remove(source_pos);
            let target = outcome.additional.remove(target_pos);
            outcome.pairs.push(Paired {
                source,
                target,
                renamed: true,
                confidence: *similarity,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identity_match_folds_naming_conventions() {
        let source = names(&["user_name", "submit_btn"]);
        let target = names(&["userName", "submit_btn"]);
        let outcome = pair_elements(&source, &target, |s| s.clone(), None);
        assert_eq!(outcome.pairs.len(), 2);
        assert!(outcome.pairs[0].renamed);
        assert!(!outcome.pairs[1].renamed);
        assert!(outcome.missing.is_empty());
        assert!(outcome.additional.is_empty());
    }

    #[test]
    fn earliest_target_wins_identity_ties() {
        let source = names(&["item"]);
        let target = names(&["Item", "item"]);
        let outcome = pair_elements(&source, &target, |s| s.clone(), None);
        assert_eq!(outcome.pairs.len(), 1);
        // First target in input order is consumed, even though the second
        // is the byte-equal one.
        assert_eq!(outcome.pairs[0].target.as_str(), "Item");
        assert_eq!(outcome.additional, vec![&"item".to_string()]);
    }

    #[test]
    fn leftovers_become_missing_and_additional() {
        let source = names(&["alpha", "beta"]);
        let target = names(&["beta", "gamma"]);
        let outcome = pair_elements(&source, &target, |s| s.clone(), None);
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.missing, vec![&"alpha".to_string()]);
        assert_eq!(outcome.additional, vec![&"gamma".to_string()]);
        assert_eq!(outcome.element_count(), 3);
    }

    #[test]
    fn signature_layer_pairs_renames() {
        let source = vec![("fetch_user".to_string(), 2usize)];
        let target = vec![("loadUser".to_string(), 2usize), ("other".to_string(), 3)];
        let signature_eq = |a: &(String, usize), b: &(String, usize)| a.1 == b.1;
        let outcome = pair_elements(
            &source,
            &target,
            |e| e.0.clone(),
            Some(&signature_eq),
        );
        assert_eq!(outcome.pairs.len(), 1);
        assert!(outcome.pairs[0].renamed);
        assert_eq!(outcome.pairs[0].target.0, "loadUser");
    }

    #[test]
    fn semantic_suggestions_respect_threshold() {
        let source = names(&["calculate_total", "obsolete"]);
        let target = names(&["computeSum", "brand_new"]);
        let mut outcome = pair_elements(&source, &target, |s| s.clone(), None);
        assert_eq!(outcome.pairs.len(), 0);

        apply_semantic_pairs(
            &mut outcome,
            &[
                ("calculate_total".into(), "computeSum".into(), 0.82),
                ("obsolete".into(), "brand_new".into(), 0.31),
            ],
            |s| s.clone(),
        );
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.pairs[0].confidence, 0.82);
        assert_eq!(outcome.missing, vec![&"obsolete".to_string()]);
        assert_eq!(outcome.additional, vec![&"brand_new".to_string()]);
    }
}
